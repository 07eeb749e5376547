// Settings 配置数据结构

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub connection: ConnectionSettings,
}

// ======================== 连接设置 ========================

/// 主机密钥校验策略
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// 只接受 known_hosts 中已有的密钥
    Strict,
    /// 首次连接自动记录，密钥变化时拒绝
    #[default]
    AcceptNew,
    /// 不校验
    Off,
}

impl HostKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::AcceptNew => "accept-new",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" | "yes" => Ok(Self::Strict),
            "accept-new" => Ok(Self::AcceptNew),
            "off" | "no" => Ok(Self::Off),
            other => Err(format!(
                "unknown host key policy '{}' (expected strict, accept-new or off)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub resize_poll_interval_ms: u64,
    pub term: String,
    /// 在默认加密算法后追加旧服务器兼容的算法
    pub extended_ciphers: bool,
    pub host_key_policy: HostKeyPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keepalive_interval_secs: 10,
            resize_poll_interval_ms: 1000,
            term: "xterm".to_string(),
            extended_ciphers: true,
            host_key_policy: HostKeyPolicy::AcceptNew,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn resize_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resize_poll_interval_ms.max(50))
    }
}
