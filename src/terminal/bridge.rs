// 终端桥接 - 本地输入转发到远端，轮询本地尺寸变化

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::ssh::session::SessionCommand;

use super::TerminalSize;

const INPUT_BUFFER_SIZE: usize = 4096;

/// 把本地输入复制到远端，输入结束时请求关闭会话
///
/// 返回转发的字节数。
pub async fn forward_input<R>(
    mut input: R,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; INPUT_BUFFER_SIZE];
    let mut forwarded = 0u64;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = input.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("[Terminal] Local input closed");
                let _ = commands.send(SessionCommand::Close).await;
                break;
            }
            Ok(n) => {
                trace!("[Terminal] Forwarding {} byte(s)", n);
                if commands
                    .send(SessionCommand::Data(buf[..n].to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
                forwarded += n as u64;
            }
            Err(e) => {
                warn!("[Terminal] Local input error: {}", e);
                let _ = commands.send(SessionCommand::Close).await;
                break;
            }
        }
    }

    forwarded
}

/// 定期查询本地尺寸，与上次发送的不同才发送 window-change
///
/// 查询失败时取消整个会话。
pub async fn watch_resize<F>(
    mut query: F,
    initial: TerminalSize,
    period: Duration,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
) where
    F: FnMut() -> io::Result<TerminalSize>,
{
    let mut last_sent = initial;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let size = match query() {
            Ok(size) => size,
            Err(e) => {
                warn!("[Terminal] Cannot read terminal size: {}", e);
                cancel.cancel();
                break;
            }
        };
        if size == last_sent {
            continue;
        }

        debug!(
            "[Terminal] Resize {}x{} -> {}x{}",
            last_sent.cols, last_sent.rows, size.cols, size.rows
        );
        if commands.send(SessionCommand::Resize(size)).await.is_err() {
            break;
        }
        last_sent = size;
    }
}
