// SSH 交互会话
// 分配 PTY、启动 shell、发送启动命令，并管理输入转发、尺寸监听和保活任务的生命周期

use std::time::Duration;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{ConnectionSettings, HostProfile, ShellCommand};
use crate::terminal::{self, RawModeGuard, TerminalSize};

use super::client::{Connection, Connector};
use super::error::SshError;
use super::keepalive::run_keepalive;
use super::stage::{SessionStage, StageTracker};

/// 命令队列容量
const COMMAND_QUEUE_SIZE: usize = 64;

/// 等待后台任务退出的上限
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 等待 PTY/shell 请求应答的上限
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

/// 本地输入结束后等待远端关闭的时间
const EOF_GRACE: Duration = Duration::from_secs(2);

/// 远端因信号退出时使用的退出码
const EXIT_BY_SIGNAL: u32 = 255;

/// PTY 终端模式
const PTY_MODES: [(russh::Pty, u32); 3] = [
    (russh::Pty::ECHO, 1),
    (russh::Pty::TTY_OP_ISPEED, 14400),
    (russh::Pty::TTY_OP_OSPEED, 14400),
];

/// 发往会话通道的命令（通道只由 pump 任务持有）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    /// 写入远端输入
    Data(Vec<u8>),
    /// 窗口尺寸变化
    Resize(TerminalSize),
    /// 结束远端输入并关闭会话
    Close,
}

/// 会话参数
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub term: String,
    pub keepalive_interval: Duration,
    pub resize_poll_interval: Duration,
}

impl SessionOptions {
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            term: settings.term.clone(),
            keepalive_interval: settings.keepalive_interval(),
            resize_poll_interval: settings.resize_poll_interval(),
        }
    }
}

/// 会话失败，附带出错时的阶段
#[derive(Debug, Error)]
#[error("{source} (while {stage})")]
pub struct SessionFailure {
    pub stage: SessionStage,
    #[source]
    pub source: SshError,
}

/// 建立连接并运行交互 shell，返回远端退出码
///
/// 任何路径返回前都会恢复终端并关闭连接。
pub async fn run(
    profile: &HostProfile,
    connector: Connector,
    options: SessionOptions,
    cancel: CancellationToken,
) -> Result<u32, SessionFailure> {
    let mut stages = StageTracker::default();

    let connected = tokio::select! {
        result = connector.connect(&mut stages) => result,
        _ = cancel.cancelled() => Err(SshError::Cancelled),
    };
    let connection = match connected {
        Ok(connection) => connection,
        Err(source) => {
            stages.finish();
            return Err(SessionFailure {
                stage: stages.last_active(),
                source,
            });
        }
    };
    info!("[Session] Connected to {}", connection.label());

    let result = run_shell(&connection, profile, &options, &mut stages, cancel.clone()).await;

    stages.advance(SessionStage::Closing);
    cancel.cancel();
    connection.close().await;
    stages.advance(SessionStage::Closed);
    debug!("[Session] Session {}", stages.current());

    result.map_err(|source| SessionFailure {
        stage: stages.last_active(),
        source,
    })
}

/// 步骤 1-10：打开通道直到远端结束；返回前恢复终端并关闭通道
async fn run_shell(
    connection: &Connection,
    profile: &HostProfile,
    options: &SessionOptions,
    stages: &mut StageTracker,
    cancel: CancellationToken,
) -> Result<u32, SshError> {
    stages.advance(SessionStage::PtyAllocating);
    let handle = connection.handle();
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| SshError::Session(format!("cannot open session channel: {}", e)))?;

    let mut raw_mode = RawModeGuard::enter()
        .map_err(|e| SshError::Pty(format!("cannot enter raw mode: {}", e)))?;
    let size = terminal::size()
        .map_err(|e| SshError::Pty(format!("cannot read terminal size: {}", e)))?;
    debug!("[Session] Local terminal {}x{}", size.cols, size.rows);

    start_shell(&mut channel, &options.term, size, stages, &cancel).await?;

    stages.advance(SessionStage::Interactive);
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_SIZE);

    let pump = tokio::spawn(pump_channel(
        channel,
        rx,
        tokio::io::stdout(),
        tokio::io::stderr(),
        cancel.clone(),
    ));

    // 启动命令全部入队之后才开始转发本地输入
    let input = {
        let cmds = profile.cmds.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if inject_startup_commands(&cmds, &tx, &cancel).await {
                terminal::forward_input(tokio::io::stdin(), tx, cancel).await;
            }
        })
    };
    let resize = tokio::spawn(terminal::watch_resize(
        terminal::size,
        size,
        options.resize_poll_interval,
        tx,
        cancel.clone(),
    ));
    let keepalive = tokio::spawn(run_keepalive(
        handle,
        options.keepalive_interval,
        cancel.clone(),
    ));

    let (channel, outcome) = match pump.await {
        Ok(done) => done,
        Err(e) => {
            cancel.cancel();
            raw_mode.restore();
            return Err(SshError::Session(format!("channel task failed: {}", e)));
        }
    };

    cancel.cancel();
    join_bounded("input", input).await;
    join_bounded("resize", resize).await;
    join_bounded("keepalive", keepalive).await;

    raw_mode.restore();
    if let Err(e) = channel.close().await {
        debug!("[Session] Channel close: {}", e);
    }

    outcome
}

/// 请求 PTY 和 shell，每一步都等待服务器确认
///
/// 拒绝、超时或取消都会返回错误，此时不会进入交互阶段。
async fn start_shell(
    channel: &mut Channel<Msg>,
    term: &str,
    size: TerminalSize,
    stages: &mut StageTracker,
    cancel: &CancellationToken,
) -> Result<(), SshError> {
    channel
        .request_pty(true, term, size.cols, size.rows, 0, 0, &PTY_MODES)
        .await
        .map_err(|e| SshError::Pty(format!("PTY request failed: {}", e)))?;
    await_reply(channel, "pty", SshError::Pty, cancel).await?;
    debug!("[Session] PTY allocated ({} {}x{})", term, size.cols, size.rows);

    stages.advance(SessionStage::ShellStarting);
    channel
        .request_shell(true)
        .await
        .map_err(|e| SshError::Session(format!("cannot start shell: {}", e)))?;
    await_reply(channel, "shell", SshError::Session, cancel).await?;
    debug!("[Session] Shell started");
    Ok(())
}

/// 等待通道请求的 Success/Failure 应答
async fn await_reply(
    channel: &mut Channel<Msg>,
    request: &str,
    fail: fn(String) -> SshError,
    cancel: &CancellationToken,
) -> Result<(), SshError> {
    let reply = async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(fail(format!("server refused the {} request", request)))
                }
                Some(ChannelMsg::Close) | None => {
                    return Err(fail(format!(
                        "channel closed while waiting for the {} reply",
                        request
                    )))
                }
                Some(other) => debug!(
                    "[Session] Ignoring {:?} while waiting for the {} reply",
                    other, request
                ),
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(SshError::Cancelled),
        result = tokio::time::timeout(REPLY_TIMEOUT, reply) => match result {
            Ok(reply) => reply,
            Err(_) => Err(fail(format!(
                "no reply to the {} request within {}s",
                request,
                REPLY_TIMEOUT.as_secs()
            ))),
        },
    }
}

async fn join_bounded<T>(name: &str, task: JoinHandle<T>) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await {
        Ok(Ok(_)) => debug!("[Session] {} task finished", name),
        Ok(Err(e)) => warn!("[Session] {} task failed: {}", name, e),
        Err(_) => warn!("[Session] {} task did not stop in time", name),
    }
}

/// 按顺序发送启动命令：先等待 delay，再写入文本和回车
///
/// 被取消时返回 false。
pub async fn inject_startup_commands(
    cmds: &[ShellCommand],
    commands: &mpsc::Sender<SessionCommand>,
    cancel: &CancellationToken,
) -> bool {
    for cmd in cmds {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(cmd.delay()) => {}
        }
        debug!("[Session] Sending startup command after {}ms", cmd.delay_ms);
        if commands
            .send(SessionCommand::Data(cmd.payload()))
            .await
            .is_err()
        {
            return false;
        }
    }
    true
}

/// pump 结束的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PumpEnd {
    /// 远端关闭通道
    Closed,
    /// 连接断开
    Lost,
    /// 本地输入结束（已发送 EOF）
    LocalClose,
    Cancelled,
}

/// 根据结束原因和远端报告的退出码得出会话结果
///
/// 远端没有报告退出码时，只有本地主动结束才算正常退出。
fn pump_outcome(end: PumpEnd, exit_status: Option<u32>) -> Result<u32, SshError> {
    match (exit_status, end) {
        (Some(status), _) => Ok(status),
        (None, PumpEnd::LocalClose) => Ok(0),
        (None, PumpEnd::Closed) => Err(SshError::Session(
            "remote closed the session without an exit status".to_string(),
        )),
        (None, PumpEnd::Lost) => Err(SshError::Session("connection lost".to_string())),
        (None, PumpEnd::Cancelled) => Err(SshError::Cancelled),
    }
}

/// 唯一持有通道的任务：执行命令队列，把远端输出写到本地
///
/// 退出时取消会话，返回通道和远端退出码。
async fn pump_channel<O, E>(
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut stdout: O,
    mut stderr: E,
    cancel: CancellationToken,
) -> (Channel<Msg>, Result<u32, SshError>)
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut exit_status: Option<u32> = None;
    let mut commands_open = true;
    let mut eof_deadline: Option<Instant> = None;

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[Session] Channel pump cancelled");
                break Ok(PumpEnd::Cancelled);
            }
            cmd = commands.recv(), if commands_open => match cmd {
                Some(SessionCommand::Data(data)) => {
                    if let Err(e) = channel.data(&data[..]).await {
                        break Err(SshError::Session(format!("cannot write to channel: {}", e)));
                    }
                }
                Some(SessionCommand::Resize(size)) => {
                    if let Err(e) = channel.window_change(size.cols, size.rows, 0, 0).await {
                        warn!("[Session] Window change failed: {}", e);
                    }
                }
                Some(SessionCommand::Close) => {
                    debug!("[Session] Closing remote input");
                    if let Err(e) = channel.eof().await {
                        debug!("[Session] Channel EOF: {}", e);
                    }
                    commands_open = false;
                    eof_deadline = Some(Instant::now() + EOF_GRACE);
                }
                None => commands_open = false,
            },
            _ = tokio::time::sleep_until(eof_deadline.unwrap_or_else(Instant::now)),
                if eof_deadline.is_some() => {
                debug!("[Session] Remote did not close after EOF");
                break Ok(PumpEnd::LocalClose);
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Err(e) = write_all(&mut stdout, &data).await {
                        break Err(SshError::Io(e));
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if let Err(e) = write_all(&mut stderr, &data).await {
                        break Err(SshError::Io(e));
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                    debug!("[Session] Remote exit status {}", status);
                    exit_status = Some(status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    info!("[Session] Remote shell killed by signal {:?}", signal_name);
                    exit_status.get_or_insert(EXIT_BY_SIGNAL);
                }
                Some(ChannelMsg::Eof) => debug!("[Session] Remote EOF"),
                Some(ChannelMsg::Close) => {
                    info!("[Session] Remote session closed");
                    break Ok(if eof_deadline.is_some() {
                        PumpEnd::LocalClose
                    } else {
                        PumpEnd::Closed
                    });
                }
                None => {
                    warn!("[Session] Connection lost");
                    break Ok(PumpEnd::Lost);
                }
                Some(_) => {}
            },
        }
    };

    cancel.cancel();
    (channel, end.and_then(|end| pump_outcome(end, exit_status)))
}

async fn write_all<W: AsyncWrite + Unpin>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    out.write_all(data).await?;
    out.flush().await
}

/// 收到终止信号时取消会话
pub fn spawn_signal_watcher(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            name = wait_for_signal() => {
                info!("[Session] Received {}, shutting down", name);
                cancel.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut term), Ok(mut hup), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("[Session] Cannot install signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
        _ = int.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "Ctrl-C",
        Err(e) => {
            warn!("[Session] Cannot listen for Ctrl-C: {}", e);
            std::future::pending().await
        }
    }
}
