// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait，负责主机密钥校验

use std::path::PathBuf;

use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use crate::models::{HostKeyPolicy, HostKeyStatus, KnownHostsConfig};
use crate::services::storage;

use super::config::SshConfig;
use super::error::SshError;

/// 主机密钥处理结果
#[derive(Debug, PartialEq, Eq)]
pub enum HostKeyDecision {
    Accept,
    /// 接受并写入 known_hosts（已知主机只刷新最后使用时间）
    AcceptAndRemember,
    Reject(String),
}

/// 根据策略和校验结果决定是否接受
pub fn decide_host_key(policy: HostKeyPolicy, status: &HostKeyStatus) -> HostKeyDecision {
    match (policy, status) {
        (HostKeyPolicy::Off, _) => HostKeyDecision::Accept,
        (_, HostKeyStatus::Trusted) => HostKeyDecision::AcceptAndRemember,
        (HostKeyPolicy::AcceptNew, HostKeyStatus::Unknown) => HostKeyDecision::AcceptAndRemember,
        (HostKeyPolicy::Strict, HostKeyStatus::Unknown) => {
            HostKeyDecision::Reject("unknown host key (strict policy)".to_string())
        }
        (_, HostKeyStatus::Changed { expected }) => HostKeyDecision::Reject(format!(
            "host key changed, expected {} (possible man-in-the-middle attack)",
            expected
        )),
    }
}

/// SSH 客户端 Handler
pub struct ClientHandler {
    /// host:port，用作 known_hosts 键
    addr: String,
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl ClientHandler {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            addr: config.address(),
            policy: config.host_key_policy,
            known_hosts: config.known_hosts.clone(),
        }
    }

    fn load_known_hosts(&self) -> KnownHostsConfig {
        let Some(path) = &self.known_hosts else {
            return KnownHostsConfig::default();
        };
        storage::load_known_hosts_from(path).unwrap_or_else(|e| {
            warn!("[SSH] Cannot load known hosts: {:#}", e);
            KnownHostsConfig::default()
        })
    }

    fn remember(&self, mut known: KnownHostsConfig, key_type: &str, fingerprint: &str) {
        let Some(path) = &self.known_hosts else {
            return;
        };
        known.remember(&self.addr, key_type, fingerprint);
        if let Err(e) = storage::save_known_hosts_to(path, &known) {
            warn!("[SSH] Cannot save host key for {}: {:#}", self.addr, e);
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key
            .fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
            .to_string();
        let key_type = server_public_key.algorithm().to_string();
        debug!(
            "[SSH] Server key for {}: {} {}",
            self.addr, key_type, fingerprint
        );

        if self.policy == HostKeyPolicy::Off {
            return Ok(true);
        }

        let known = self.load_known_hosts();
        let status = known.verify(&self.addr, &fingerprint);

        match decide_host_key(self.policy, &status) {
            HostKeyDecision::Accept => Ok(true),
            HostKeyDecision::AcceptAndRemember => {
                if status == HostKeyStatus::Unknown {
                    info!(
                        "[SSH] New host {}, remembering key {} {}",
                        self.addr, key_type, fingerprint
                    );
                }
                self.remember(known, &key_type, &fingerprint);
                Ok(true)
            }
            HostKeyDecision::Reject(reason) => {
                warn!("[SSH] Rejecting host key for {}: {}", self.addr, reason);
                Err(SshError::HostKey {
                    addr: self.addr.clone(),
                    reason: format!("{} (got {})", reason, fingerprint),
                })
            }
        }
    }
}
