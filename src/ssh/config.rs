// SSH 连接配置

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use russh::cipher;

use crate::models::{ConnectionSettings, HostKeyPolicy, HostProfile};

use super::auth::AuthMethod;
use super::error::SshError;

/// 追加在默认算法之后的旧服务器兼容加密算法
pub const EXTENDED_CIPHERS: [cipher::Name; 6] = [
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
];

/// 单跳 SSH 连接配置
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 按顺序尝试的认证方式
    pub auth: Vec<AuthMethod>,
    /// 连接超时
    pub connect_timeout: Duration,
    /// 追加兼容加密算法
    pub extended_ciphers: bool,
    /// 主机密钥校验策略
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts 文件（None 时只在内存中校验）
    pub known_hosts: Option<PathBuf>,
}

impl SshConfig {
    /// 从主机配置构建
    pub fn from_profile(
        profile: &HostProfile,
        auth: Vec<AuthMethod>,
        settings: &ConnectionSettings,
        known_hosts: Option<PathBuf>,
    ) -> Result<Self, SshError> {
        if profile.host.trim().is_empty() {
            return Err(SshError::Config(format!(
                "profile '{}' has no host",
                profile.name
            )));
        }
        let port = profile.port_number().map_err(SshError::Config)?;

        Ok(Self {
            host: profile.host.clone(),
            port,
            username: profile.user.clone(),
            auth,
            connect_timeout: settings.connect_timeout(),
            extended_ciphers: settings.extended_ciphers,
            host_key_policy: settings.host_key_policy,
            known_hosts,
        })
    }

    /// host:port
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config {
            // 超时由连接阶段单独控制，保活由会话层的 keepalive 任务负责
            inactivity_timeout: None,
            keepalive_interval: None,
            ..Default::default()
        };
        if self.extended_ciphers {
            config.preferred = russh::Preferred {
                cipher: Cow::Owned(cipher_list(&config.preferred.cipher)),
                ..config.preferred.clone()
            };
        }
        config
    }
}

/// 默认算法 + 兼容算法（去重，保持顺序）
fn cipher_list(defaults: &[cipher::Name]) -> Vec<cipher::Name> {
    let mut ciphers = defaults.to_vec();
    for name in EXTENDED_CIPHERS {
        if !ciphers.contains(&name) {
            ciphers.push(name);
        }
    }
    ciphers
}
