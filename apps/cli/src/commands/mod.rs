//! 命令定义和实现

pub mod acquire;
pub mod config;
pub mod status;
pub mod stop;
pub mod temps;

pub use acquire::AcquireCommand;
pub use config::ConfigCommand;
pub use status::StatusCommand;
pub use stop::StopCommand;
pub use temps::TempsCommand;
