mod config_cmd;
mod doc;

pub use config_cmd::ConfigCommand;
pub use doc::DocCommand;
