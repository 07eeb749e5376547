// SSH 错误类型定义

use std::path::PathBuf;

use thiserror::Error;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 私钥读取或解析失败
    #[error("Cannot load private key {}: {reason}", path.display())]
    AuthConfig { path: PathBuf, reason: String },

    /// 交互式密码输入失败
    #[error("Password prompt failed: {0}")]
    InteractiveAuth(#[source] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 直连失败（网络或握手）
    #[error("Cannot connect to {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// 跳板链中某一跳失败（hop 从 1 开始计数）
    #[error("Jump hop {hop} ({addr}) failed: {source}")]
    JumpDial {
        hop: usize,
        addr: String,
        #[source]
        source: Box<SshError>,
    },

    /// 主机密钥校验失败
    #[error("Host key verification failed for {addr}: {reason}")]
    HostKey { addr: String, reason: String },

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// PTY 分配或本地终端失败
    #[error("PTY error: {0}")]
    Pty(String),

    /// 会话错误（shell 启动、等待、通道）
    #[error("Session error: {0}")]
    Session(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 连接已取消
    #[error("Connection cancelled")]
    Cancelled,
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

impl SshError {
    /// 包装为跳板链错误
    pub fn at_hop(self, hop: usize, addr: impl Into<String>) -> Self {
        SshError::JumpDial {
            hop,
            addr: addr.into(),
            source: Box::new(self),
        }
    }

    /// 跳板链中失败的那一跳
    pub fn failed_hop(&self) -> Option<usize> {
        match self {
            SshError::JumpDial { hop, .. } => Some(*hop),
            _ => None,
        }
    }
}
