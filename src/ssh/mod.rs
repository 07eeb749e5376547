// SSH 连接模块
//
// 模块结构:
// - auth: 认证方式构建 (AuthMethod, PasswordPrompt)
// - config: 单跳连接配置 (SshConfig)
// - error: 错误类型 (SshError)
// - handler: russh Handler 实现，主机密钥校验
// - client: 连接器，直连或经跳板链 (ConnectPlan, Connector, Connection)
// - stage: 会话阶段 (SessionStage)
// - keepalive: 保活任务
// - session: 交互会话编排

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod keepalive;
pub mod session;
pub mod stage;

#[cfg(test)]
pub(crate) mod test_server;

// 公开导出
pub use auth::TerminalPrompt;
pub use client::{ConnectPlan, Connector};
pub use session::SessionOptions;
