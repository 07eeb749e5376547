// SSH 连接器
// 先为每一跳准备好认证方式，再逐跳建立连接，返回目标主机的已认证连接

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh::client::{AuthResult, Handle, Msg};
use russh::ChannelStream;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::models::{ConnectionSettings, HostProfile};

use super::auth::{build_auth_methods, AuthMethod, PasswordPrompt};
use super::config::SshConfig;
use super::error::SshError;
use super::handler::ClientHandler;
use super::stage::{SessionStage, StageTracker};

/// 连接计划：按拨号顺序排列的每一跳配置，最后一跳是目标主机
#[derive(Debug)]
pub struct ConnectPlan {
    hops: Vec<SshConfig>,
}

impl ConnectPlan {
    /// 解析跳板链并为每一跳构建认证方式（包括交互输入），不发起任何网络连接
    pub fn build(
        profile: &HostProfile,
        prompt: &mut dyn PasswordPrompt,
        settings: &ConnectionSettings,
        known_hosts: Option<PathBuf>,
    ) -> Result<Self, SshError> {
        let mut chain = Vec::new();
        flatten_chain(profile, &mut chain);

        let mut hops = Vec::with_capacity(chain.len());
        for hop in chain {
            let auth = build_auth_methods(&hop, prompt)?;
            hops.push(SshConfig::from_profile(
                &hop,
                auth,
                settings,
                known_hosts.clone(),
            )?);
        }
        Ok(Self { hops })
    }

    pub fn hops(&self) -> &[SshConfig] {
        &self.hops
    }

    /// 是否直连（没有跳板机）
    pub fn is_direct(&self) -> bool {
        self.hops.len() == 1
    }

    pub fn destination(&self) -> Option<&SshConfig> {
        self.hops.last()
    }
}

/// 展开跳板链：跳板机（及其自身的跳板机）在前，目标主机在最后
fn flatten_chain(profile: &HostProfile, out: &mut Vec<HostProfile>) {
    for hop in &profile.jump {
        flatten_chain(hop, out);
    }
    let mut hop = profile.clone();
    hop.jump.clear();
    hop.normalize();
    out.push(hop);
}

/// SSH 连接器
pub struct Connector {
    plan: ConnectPlan,
}

impl Connector {
    pub fn new(plan: ConnectPlan) -> Self {
        Self { plan }
    }

    /// 按计划逐跳连接
    ///
    /// 第一跳直连，之后每一跳都经上一跳的 direct-tcpip 通道建立独立的握手和认证。
    pub async fn connect(&self, stages: &mut StageTracker) -> Result<Connection, SshError> {
        let hops = self.plan.hops();
        let Some(target) = self.plan.destination() else {
            return Err(SshError::Config("no hosts to connect".to_string()));
        };

        if self.plan.is_direct() {
            let handle = connect_direct(target, stages).await?;
            return Ok(Connection::new(target.address(), handle, Vec::new()));
        }

        let jump_count = hops.len() - 1;
        info!(
            "[SSH] Connecting to {} through {} jump host(s)",
            target.address(),
            jump_count
        );

        let mut jump_handles: Vec<Handle<ClientHandler>> = Vec::with_capacity(jump_count);
        let mut stream: Option<ChannelStream<Msg>> = None;

        for (index, hop) in hops.iter().enumerate() {
            let hop_number = index + 1;
            let result = match stream.take() {
                None => connect_direct(hop, stages).await,
                Some(tunnel) => connect_tunneled(hop, tunnel, stages).await,
            };
            let handle = match result {
                Ok(handle) => handle,
                Err(e) => {
                    close_handles(&jump_handles).await;
                    return Err(e.at_hop(hop_number, hop.address()));
                }
            };

            let Some(next) = hops.get(index + 1) else {
                return Ok(Connection::new(target.address(), handle, jump_handles));
            };

            debug!(
                "[SSH] Hop {}: opening tunnel to {}",
                hop_number,
                next.address()
            );
            match handle
                .channel_open_direct_tcpip(next.host.as_str(), next.port as u32, "127.0.0.1", 0)
                .await
            {
                Ok(channel) => stream = Some(channel.into_stream()),
                Err(e) => {
                    jump_handles.push(handle);
                    close_handles(&jump_handles).await;
                    return Err(SshError::Dial {
                        addr: next.address(),
                        reason: format!("cannot open tunnel: {}", e),
                    }
                    .at_hop(index + 2, next.address()));
                }
            }
            jump_handles.push(handle);
        }

        Err(SshError::Config("empty jump chain".to_string()))
    }
}

/// 直连一台主机并认证
async fn connect_direct(
    config: &SshConfig,
    stages: &mut StageTracker,
) -> Result<Handle<ClientHandler>, SshError> {
    stages.advance(SessionStage::Connecting);
    let addr = config.address();
    info!("[SSH] Connecting to {}...", addr);

    let tcp_stream = timeout(
        config.connect_timeout,
        TcpStream::connect((config.host.as_str(), config.port)),
    )
    .await
    .map_err(|_| dial_error(&addr, SshError::Timeout(config.connect_timeout.as_secs())))?
    .map_err(|e| dial_error(&addr, SshError::Io(e)))?;
    debug!("[SSH] TCP connection to {} established", addr);

    handshake(config, tcp_stream, stages).await
}

/// 经上一跳的隧道连接并认证
async fn connect_tunneled(
    config: &SshConfig,
    stream: ChannelStream<Msg>,
    stages: &mut StageTracker,
) -> Result<Handle<ClientHandler>, SshError> {
    stages.advance(SessionStage::Connecting);
    info!("[SSH] Connecting to {} through tunnel...", config.address());
    handshake(config, stream, stages).await
}

/// 在已建立的字节流上完成 SSH 握手和认证
async fn handshake<S>(
    config: &SshConfig,
    stream: S,
    stages: &mut StageTracker,
) -> Result<Handle<ClientHandler>, SshError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let addr = config.address();
    let russh_config = Arc::new(config.to_russh_config());
    let handler = ClientHandler::new(config);

    let mut handle = timeout(
        config.connect_timeout,
        russh::client::connect_stream(russh_config, stream, handler),
    )
    .await
    .map_err(|_| dial_error(&addr, SshError::Timeout(config.connect_timeout.as_secs())))?
    .map_err(|e| dial_error(&addr, e))?;
    debug!("[SSH] Handshake with {} completed", addr);

    stages.advance(SessionStage::Authenticating);
    authenticate(&mut handle, config)
        .await
        .map_err(|e| dial_error(&addr, e))?;
    info!("[SSH] Authenticated to {} as '{}'", addr, config.username);
    Ok(handle)
}

/// 网络、握手和认证失败统一为 Dial，主机密钥错误保持原样
fn dial_error(addr: &str, e: SshError) -> SshError {
    match e {
        SshError::HostKey { .. } | SshError::Dial { .. } => e,
        other => SshError::Dial {
            addr: addr.to_string(),
            reason: other.to_string(),
        },
    }
}

/// 按顺序尝试认证方式，直到成功
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    config: &SshConfig,
) -> Result<(), SshError> {
    if config.auth.is_empty() {
        return Err(SshError::Auth(format!(
            "no authentication method configured for {}",
            config.address()
        )));
    }

    let mut last_failure = String::new();
    for method in &config.auth {
        debug!(
            "[SSH] Trying {} authentication for {}",
            method.kind(),
            config.username
        );
        let result = match method {
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(&config.username, password)
                    .await?
            }
            AuthMethod::PublicKey(key) => {
                let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(key.clone(), None);
                handle
                    .authenticate_publickey(&config.username, key_with_alg)
                    .await?
            }
        };

        match result {
            AuthResult::Success => return Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                last_failure = if partial_success {
                    "partial authentication, additional auth required".to_string()
                } else {
                    format!(
                        "{} rejected, server suggests: {:?}",
                        method.kind(),
                        remaining_methods
                    )
                };
                debug!("[SSH] {}", last_failure);
            }
        }
    }

    Err(SshError::Auth(format!(
        "{}@{}: {}",
        config.username,
        config.address(),
        last_failure
    )))
}

async fn close_handles(handles: &[Handle<ClientHandler>]) {
    for handle in handles.iter().rev() {
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("[SSH] Disconnect failed: {}", e);
        }
    }
}

/// 已认证的连接（目标主机 + 跳板机）
pub struct Connection {
    label: String,
    target: Arc<Handle<ClientHandler>>,
    /// 按拨号顺序保存
    jumps: Vec<Handle<ClientHandler>>,
    closed: AtomicBool,
}

impl Connection {
    fn new(label: String, target: Handle<ClientHandler>, jumps: Vec<Handle<ClientHandler>>) -> Self {
        Self {
            label,
            target: Arc::new(target),
            jumps,
            closed: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 目标主机的共享 Handle
    pub fn handle(&self) -> Arc<Handle<ClientHandler>> {
        self.target.clone()
    }

    /// 关闭连接：先目标主机，再从最内层开始关闭跳板机；重复调用无效果
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[SSH] Closing connection to {}", self.label);
        if let Err(e) = self
            .target
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            warn!("[SSH] Disconnect from {} failed: {}", self.label, e);
        }
        close_handles(&self.jumps).await;
    }
}
