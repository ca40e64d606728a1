// 配置模块

pub mod env;
pub mod subsystem;

pub use env::EnvConfig;
pub use subsystem::SubsystemConfig;
