// HostProfile, ShellCommand 数据结构

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// 默认 SSH 端口
pub const DEFAULT_PORT: &str = "22";

/// 主机配置（从 YAML 加载）
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HostProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub host: String,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, rename = "keypath")]
    pub key_path: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "needauth")]
    pub need_auth: bool,
    /// 跳板机链（按顺序逐跳连接）
    #[serde(default)]
    pub jump: Vec<HostProfile>,
    /// 登录后自动发送的命令
    #[serde(default)]
    pub cmds: Vec<ShellCommand>,
}

/// 启动命令
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ShellCommand {
    #[serde(rename = "cmd")]
    pub text: String,
    /// 延迟（毫秒），相对于上一条命令或 shell 启动
    #[serde(default, rename = "delay")]
    pub delay_ms: u64,
}

impl ShellCommand {
    pub fn new(text: impl Into<String>, delay_ms: u64) -> Self {
        Self {
            text: text.into(),
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// 实际写入远端的字节（追加回车）
    pub fn payload(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 1);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.push(b'\r');
        bytes
    }
}

impl HostProfile {
    /// 规范化顶层配置：强制 need_auth，补全默认端口
    pub fn normalize_top_level(&mut self) {
        self.normalize();
        self.need_auth = true;
    }

    /// 规范化：补全端口；没有任何凭据时需要交互认证；递归处理跳板机
    pub fn normalize(&mut self) {
        if self.port.trim().is_empty() {
            self.port = DEFAULT_PORT.to_string();
        }
        if !self.has_credentials() {
            self.need_auth = true;
        }
        for hop in &mut self.jump {
            hop.normalize();
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.key_path.as_deref().is_some_and(|p| !p.is_empty())
            || self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// 端口号（空值按 22 处理）
    pub fn port_number(&self) -> Result<u16, String> {
        let port = self.port.trim();
        let port = if port.is_empty() { DEFAULT_PORT } else { port };
        port.parse::<u16>()
            .map_err(|_| format!("invalid port '{}' for host '{}'", port, self.host))
    }

    /// host:port，IPv6 地址加方括号
    pub fn address(&self) -> String {
        let port = self.port_number().map(|p| p.to_string()).unwrap_or_else(|_| self.port.clone());
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, port)
        } else {
            format!("{}:{}", self.host, port)
        }
    }

    /// 私钥路径（展开 ~）
    pub fn key_file(&self) -> Option<PathBuf> {
        self.key_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(expand_tilde)
    }

    /// 按名称或别名精确匹配
    pub fn matches_name(&self, name: &str) -> bool {
        self.name == name || (!self.alias.is_empty() && self.alias == name)
    }

    /// 用于关键字过滤的文本
    pub fn search_text(&self) -> String {
        format!("{} {} {}", self.name, self.user, self.host)
    }
}

impl fmt::Display for HostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.address())
        } else {
            write!(f, "{}@{}", self.user, self.address())
        }
    }
}

/// 展开 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// 端口既可写成字符串也可写成整数
fn deserialize_port<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<PortValue>::deserialize(deserializer)? {
        Some(PortValue::Text(s)) => s,
        Some(PortValue::Number(n)) => n.to_string(),
        None => String::new(),
    })
}
