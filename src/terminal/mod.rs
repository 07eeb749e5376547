// 本地终端 - raw 模式、尺寸查询、输入转发和尺寸监听

mod bridge;

pub use bridge::{forward_input, watch_resize};

use std::io;

use crossterm::terminal;
use tracing::{debug, warn};

/// 终端尺寸（列 × 行）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u32,
    pub rows: u32,
}

impl TerminalSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }
}

/// 读取本地终端尺寸
pub fn size() -> io::Result<TerminalSize> {
    let (cols, rows) = terminal::size()?;
    Ok(TerminalSize::new(cols as u32, rows as u32))
}

/// raw 模式守卫，Drop 时恢复进入前的状态
pub struct RawModeGuard {
    was_raw: bool,
    restored: bool,
}

impl RawModeGuard {
    pub fn enter() -> io::Result<Self> {
        let was_raw = terminal::is_raw_mode_enabled()?;
        if !was_raw {
            terminal::enable_raw_mode()?;
            debug!("[Terminal] Raw mode enabled");
        }
        Ok(Self {
            was_raw,
            restored: false,
        })
    }

    /// 恢复终端（可重复调用）
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if self.was_raw {
            return;
        }
        match terminal::disable_raw_mode() {
            Ok(()) => debug!("[Terminal] Raw mode disabled"),
            Err(e) => warn!("[Terminal] Failed to restore terminal: {}", e),
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
