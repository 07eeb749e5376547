// 保活任务
// 定期发送 keepalive@openssh.com 全局请求（不等待回复），会话结束即停止

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::SshError;
use super::handler::ClientHandler;

/// 保活请求的发送端
#[async_trait]
pub trait KeepaliveSender: Send + Sync {
    async fn send_keepalive(&self) -> Result<(), SshError>;
}

#[async_trait]
impl KeepaliveSender for Handle<ClientHandler> {
    async fn send_keepalive(&self) -> Result<(), SshError> {
        Handle::send_keepalive(self, false).await?;
        Ok(())
    }
}

/// 每隔 `period` 发送一次保活请求，直到取消
///
/// 发送失败只记录日志，连接是否断开由会话通道判断。
pub async fn run_keepalive<S>(sender: Arc<S>, period: Duration, cancel: CancellationToken) -> u64
where
    S: KeepaliveSender + ?Sized,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match sender.send_keepalive().await {
                    Ok(()) => sent += 1,
                    Err(e) => warn!("[Keepalive] Send failed: {}", e),
                }
            }
        }
    }

    debug!("[Keepalive] Stopped after {} request(s)", sent);
    sent
}
