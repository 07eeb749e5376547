// Known Hosts 数据模型
// 用于存储和验证 SSH 服务器公钥指纹

use serde::{Deserialize, Serialize};

/// 已知主机条目
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KnownHost {
    /// 主机地址（host:port 格式）
    pub host: String,
    /// 密钥类型（ssh-ed25519, ssh-rsa 等）
    pub key_type: String,
    /// SHA256 指纹
    pub fingerprint: String,
    /// 首次连接时间
    pub first_seen: String,
    /// 最后使用时间
    pub last_used: String,
}

/// Known Hosts 配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KnownHostsConfig {
    pub hosts: Vec<KnownHost>,
}

/// 主机密钥校验结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// 指纹一致
    Trusted,
    /// 首次连接
    Unknown,
    /// 指纹变化（可能是中间人攻击）
    Changed { expected: String },
}

impl KnownHostsConfig {
    pub fn find(&self, host: &str) -> Option<&KnownHost> {
        self.hosts.iter().find(|h| h.host == host)
    }

    pub fn verify(&self, host: &str, fingerprint: &str) -> HostKeyStatus {
        match self.find(host) {
            Some(known) if known.fingerprint == fingerprint => HostKeyStatus::Trusted,
            Some(known) => HostKeyStatus::Changed {
                expected: known.fingerprint.clone(),
            },
            None => HostKeyStatus::Unknown,
        }
    }

    /// 记录新主机；已存在则只刷新最后使用时间
    pub fn remember(&mut self, host: &str, key_type: &str, fingerprint: &str) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M").to_string();
        if let Some(existing) = self.hosts.iter_mut().find(|h| h.host == host) {
            if existing.fingerprint == fingerprint {
                existing.last_used = now;
            }
            return;
        }
        self.hosts.push(KnownHost {
            host: host.to_string(),
            key_type: key_type.to_string(),
            fingerprint: fingerprint.to_string(),
            first_seen: now.clone(),
            last_used: now,
        });
    }
}
