// essh - 交互式 SSH 客户端
// 应用入口：解析参数、初始化日志、选择主机、运行会话

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod models;
mod picker;
mod services;
mod ssh;
mod terminal;

use models::{HostKeyPolicy, HostProfile};
use services::storage;
use ssh::{session, ConnectPlan, Connector, SessionOptions, TerminalPrompt};

/// 非远端原因失败时的退出码
const EXIT_FAILURE: i32 = 1;

/// 远端退出码超出范围时使用
const EXIT_STATUS_OUT_OF_RANGE: i32 = 255;

#[derive(Debug, Parser)]
#[command(name = "essh", version, about = "Pick a host and open an interactive SSH session")]
struct Cli {
    /// 主机名称或别名（省略时打开选择列表）
    host: Option<String>,

    /// 主机配置文件
    #[arg(short, long, env = "ESSH_CONFIG")]
    config: Option<PathBuf>,

    /// 主机密钥校验策略：strict / accept-new / off
    #[arg(long)]
    host_key_policy: Option<HostKeyPolicy>,

    /// 日志写入文件（交互会话中建议使用）
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// 日志详细程度（-v info，-vv debug）
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("essh: {:#}", e);
        std::process::exit(EXIT_FAILURE);
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("[App] {:#}", e);
            eprintln!("essh: {:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

/// 初始化日志系统
/// RUST_LOG 优先，否则按 -v 次数决定级别
fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false); // 不显示 target（模块路径）

    match &cli.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn select_profile(cli: &Cli, profiles: &[HostProfile]) -> Result<Option<HostProfile>> {
    match &cli.host {
        Some(name) => profiles
            .iter()
            .find(|p| p.matches_name(name))
            .cloned()
            .map(Some)
            .ok_or_else(|| anyhow!("no host named '{}' in the host config", name)),
        None => picker::pick(profiles),
    }
}

fn run(cli: Cli) -> Result<i32> {
    let profiles = storage::load_profiles(cli.config.as_deref())?;
    let Some(profile) = select_profile(&cli, &profiles)? else {
        info!("[App] No host selected");
        return Ok(0);
    };

    let mut settings = storage::load_settings().unwrap_or_else(|e| {
        warn!("[App] Using default settings: {:#}", e);
        Default::default()
    });
    if let Some(policy) = cli.host_key_policy {
        settings.connection.host_key_policy = policy;
    }
    let known_hosts = match storage::get_known_hosts_file() {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("[App] Host keys will not be persisted: {:#}", e);
            None
        }
    };

    // 所有跳的认证信息（包括交互输入的密码）在拨号前准备好
    let plan = ConnectPlan::build(
        &profile,
        &mut TerminalPrompt,
        &settings.connection,
        known_hosts,
    )
    .with_context(|| format!("cannot prepare connection to {}", profile.name))?;
    let options = SessionOptions::from_settings(&settings.connection);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("essh-worker")
        .build()
        .context("Failed to create Tokio runtime")?;

    info!("[App] Connecting to {} ({})", profile.name, profile);
    let cancel = CancellationToken::new();
    let result = runtime.block_on(async {
        let signals = session::spawn_signal_watcher(cancel.clone());
        let result = session::run(&profile, Connector::new(plan), options, cancel.clone()).await;
        cancel.cancel();
        let _ = signals.await;
        result
    });
    // 阻塞中的 stdin 读取不能拖住退出
    runtime.shutdown_background();

    // 终端已恢复、连接已关闭，此时再报告错误
    match result {
        Ok(status) => {
            info!("[App] Session finished with status {}", status);
            Ok(i32::try_from(status).unwrap_or(EXIT_STATUS_OUT_OF_RANGE))
        }
        Err(failure) => {
            match failure.source.failed_hop() {
                Some(hop) => error!(
                    "[App] Session failed while {} at hop {}: {}",
                    failure.stage, hop, failure.source
                ),
                None => error!("[App] Session failed while {}: {}", failure.stage, failure.source),
            }
            eprintln!("essh: {}: {}", profile.name, failure);
            Ok(EXIT_FAILURE)
        }
    }
}
