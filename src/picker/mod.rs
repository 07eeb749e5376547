// 主机选择器
// 关键字过滤 + 终端交互列表（绘制在 stderr 的备用屏幕上）

use std::io::{self, Write};

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use tracing::debug;

use crate::models::HostProfile;

/// 最多显示的行数
pub const MAX_VISIBLE_ROWS: usize = 20;

/// 按关键字过滤：空格分隔的每个关键字都必须出现在 "name user host" 中（区分大小写）
pub fn filter_profiles(profiles: &[HostProfile], query: &str) -> Vec<usize> {
    let keywords: Vec<&str> = query.split(' ').filter(|k| !k.is_empty()).collect();
    profiles
        .iter()
        .enumerate()
        .filter(|(_, profile)| {
            let text = profile.search_text();
            keywords.iter().all(|k| text.contains(k))
        })
        .map(|(index, _)| index)
        .collect()
}

/// 列表中显示的一行
pub fn display_line(profile: &HostProfile) -> String {
    let name = if profile.alias.is_empty() {
        profile.name.clone()
    } else {
        format!("{}({})", profile.name, profile.alias)
    };
    format!("{}  {}", name, profile)
}

/// 按键处理结果
#[derive(Debug, PartialEq, Eq)]
pub enum PickerAction {
    Continue,
    Select(usize),
    Cancel,
}

/// 选择器状态（不涉及终端 IO）
#[derive(Debug)]
pub struct PickerState<'a> {
    profiles: &'a [HostProfile],
    query: String,
    matches: Vec<usize>,
    cursor: usize,
}

impl<'a> PickerState<'a> {
    pub fn new(profiles: &'a [HostProfile]) -> Self {
        Self {
            profiles,
            query: String::new(),
            matches: (0..profiles.len()).collect(),
            cursor: 0,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[usize] {
        &self.matches
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn refilter(&mut self) {
        self.matches = filter_profiles(self.profiles, &self.query);
        self.cursor = 0;
    }

    fn move_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn move_down(&mut self) {
        if self.cursor + 1 < self.matches.len() {
            self.cursor += 1;
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> PickerAction {
        if key.kind != KeyEventKind::Press {
            return PickerAction::Continue;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => return PickerAction::Cancel,
            KeyCode::Char('p') if ctrl => self.move_up(),
            KeyCode::Char('n') if ctrl => self.move_down(),
            KeyCode::Char('u') if ctrl => {
                self.query.clear();
                self.refilter();
            }
            KeyCode::Esc => return PickerAction::Cancel,
            KeyCode::Up => self.move_up(),
            KeyCode::Down => self.move_down(),
            KeyCode::Enter => {
                if let Some(&index) = self.matches.get(self.cursor) {
                    return PickerAction::Select(index);
                }
            }
            KeyCode::Backspace => {
                if self.query.pop().is_some() {
                    self.refilter();
                }
            }
            KeyCode::Char(c) if !ctrl => {
                self.query.push(c);
                self.refilter();
            }
            _ => {}
        }
        PickerAction::Continue
    }

    /// 当前可见窗口 [start, end)，保证光标在窗口内
    pub fn visible_range(&self, height: usize) -> (usize, usize) {
        let height = height.clamp(1, MAX_VISIBLE_ROWS);
        let total = self.matches.len();
        if total <= height {
            return (0, total);
        }
        let start = self
            .cursor
            .saturating_sub(height / 2)
            .min(total - height);
        (start, start + height)
    }
}

/// 终端屏幕守卫，Drop 时恢复
struct Screen {
    out: io::Stderr,
}

impl Screen {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = io::stderr();
        if let Err(e) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
        Ok(Self { out })
    }

    fn draw(&mut self, state: &PickerState<'_>) -> io::Result<()> {
        let (_, rows) = terminal::size().unwrap_or((80, 24));
        let height = (rows as usize).saturating_sub(2);
        let (start, end) = state.visible_range(height);

        queue!(
            self.out,
            MoveTo(0, 0),
            Clear(ClearType::All),
            Print(format!(
                "Search: {}  ({}/{})",
                state.query(),
                state.matches().len(),
                state.profiles.len()
            ))
        )?;

        for (row, position) in (start..end).enumerate() {
            let profile = &state.profiles[state.matches()[position]];
            queue!(self.out, MoveTo(0, row as u16 + 1))?;
            if position == state.cursor() {
                queue!(
                    self.out,
                    SetAttribute(Attribute::Reverse),
                    Print(format!("> {}", display_line(profile))),
                    SetAttribute(Attribute::Reset)
                )?;
            } else {
                queue!(self.out, Print(format!("  {}", display_line(profile))))?;
            }
        }
        self.out.flush()
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// 交互选择主机，用户取消时返回 None
pub fn pick(profiles: &[HostProfile]) -> Result<Option<HostProfile>> {
    let mut state = PickerState::new(profiles);
    let mut screen = Screen::enter().context("Failed to initialize host picker")?;

    loop {
        screen.draw(&state).context("Failed to draw host picker")?;
        let Event::Key(key) = event::read().context("Failed to read key")? else {
            continue;
        };
        match state.handle_key(key) {
            PickerAction::Continue => {}
            PickerAction::Cancel => {
                debug!("[Picker] Cancelled");
                return Ok(None);
            }
            PickerAction::Select(index) => {
                debug!("[Picker] Selected {}", profiles[index].name);
                return Ok(Some(profiles[index].clone()));
            }
        }
    }
}
