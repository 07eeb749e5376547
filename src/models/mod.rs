// 数据模型模块

pub mod host;
pub mod known_hosts;
pub mod settings;

pub use host::{HostProfile, ShellCommand};
pub use known_hosts::{HostKeyStatus, KnownHostsConfig};
pub use settings::{AppSettings, ConnectionSettings, HostKeyPolicy};
