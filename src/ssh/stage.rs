// 会话阶段状态机

use std::fmt;

use tracing::{debug, warn};

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStage {
    /// 建立连接（直连或经跳板机）
    Connecting = 0,
    /// 身份认证
    Authenticating = 1,
    /// 分配 PTY
    PtyAllocating = 2,
    /// 启动 shell
    ShellStarting = 3,
    /// 交互中
    Interactive = 4,
    /// 清理资源
    Closing = 5,
    /// 已关闭
    Closed = 6,
}

impl SessionStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::PtyAllocating => "allocating pty",
            Self::ShellStarting => "starting shell",
            Self::Interactive => "interactive",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// 是否允许从当前阶段进入 `next`
    ///
    /// 跳板链中每一跳认证完成后会回到 Connecting 连接下一跳。
    pub fn can_advance_to(&self, next: SessionStage) -> bool {
        use SessionStage::*;
        match (self, next) {
            (Closed, _) => false,
            (Closing, Closed) => true,
            (Closing, _) => false,
            (_, Closing) => true,
            (Connecting, Authenticating) => true,
            (Authenticating, Connecting | PtyAllocating) => true,
            (PtyAllocating, ShellStarting) => true,
            (ShellStarting, Interactive) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 记录当前阶段，失败时用于报告出错的阶段
#[derive(Debug)]
pub struct StageTracker {
    current: SessionStage,
    /// 进入 Closing 之前的最后一个阶段
    last_active: SessionStage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: SessionStage::Connecting,
            last_active: SessionStage::Connecting,
        }
    }
}

impl StageTracker {
    pub fn current(&self) -> SessionStage {
        self.current
    }

    /// 出错或结束时所处的阶段
    pub fn last_active(&self) -> SessionStage {
        self.last_active
    }

    pub fn advance(&mut self, next: SessionStage) {
        if self.current == next {
            return;
        }
        if !self.current.can_advance_to(next) {
            warn!(
                "[Session] Ignoring invalid stage transition {} -> {}",
                self.current, next
            );
            return;
        }
        debug!("[Session] Stage: {} -> {}", self.current, next);
        if next < SessionStage::Closing {
            self.last_active = next;
        }
        self.current = next;
    }

    /// 进入 Closing 然后 Closed
    pub fn finish(&mut self) {
        self.advance(SessionStage::Closing);
        self.advance(SessionStage::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut stages = StageTracker::default();
        for next in [
            SessionStage::Authenticating,
            SessionStage::PtyAllocating,
            SessionStage::ShellStarting,
            SessionStage::Interactive,
            SessionStage::Closing,
            SessionStage::Closed,
        ] {
            stages.advance(next);
            assert_eq!(stages.current(), next);
        }
        assert_eq!(stages.last_active(), SessionStage::Interactive);
    }

    #[test]
    fn test_jump_chain_returns_to_connecting() {
        let mut stages = StageTracker::default();
        stages.advance(SessionStage::Authenticating);
        stages.advance(SessionStage::Connecting);
        assert_eq!(stages.current(), SessionStage::Connecting);
    }

    #[test]
    fn test_failure_before_interactive_goes_to_closing() {
        let mut stages = StageTracker::default();
        stages.advance(SessionStage::Authenticating);
        stages.advance(SessionStage::PtyAllocating);
        stages.finish();
        assert_eq!(stages.current(), SessionStage::Closed);
        assert_eq!(stages.last_active(), SessionStage::PtyAllocating);
    }

    #[test]
    fn test_invalid_transitions_ignored() {
        let mut stages = StageTracker::default();
        stages.advance(SessionStage::Interactive);
        assert_eq!(stages.current(), SessionStage::Connecting);

        stages.finish();
        stages.advance(SessionStage::Connecting);
        assert_eq!(stages.current(), SessionStage::Closed);
    }
}
