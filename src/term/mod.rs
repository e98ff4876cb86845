// Raw terminal handling - single-key reads without echo, plus the width
// arithmetic the redraw loop needs to erase exactly what it painted.

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{cursor, execute};
use regex::Regex;
use std::io;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use unicode_width::UnicodeWidthChar;

/// Raised when the user hits ctrl-c during an input read; unwinds the
/// playback loop so guards run before the process exits.
#[derive(Debug, Error)]
#[error("interrupted")]
pub struct Interrupted;

pub const CLEAR_LINE: &str = "\x1b[2K";
pub const MOVE_AND_CLEAR_LINE: &str = "\x1b[1A\x1b[2K";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Tab,
    Esc,
    Interrupt,
}

/// Scoped raw-mode acquisition. The cursor is hidden for the whole session;
/// release is idempotent and also runs on drop, so every exit path restores
/// the terminal.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn acquire() -> Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), cursor::Hide)?;
        Ok(Self { active: true })
    }

    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), cursor::Show);
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read one pending key without blocking. Returns `None` immediately when
/// no input is waiting.
pub fn read_key() -> Result<Option<Key>> {
    if !event::poll(Duration::ZERO)? {
        return Ok(None);
    }

    match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => Ok(map_key(key)),
        _ => Ok(None),
    }
}

fn map_key(key: KeyEvent) -> Option<Key> {
    // ETX - the interrupt byte raw mode no longer turns into a signal.
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Key::Interrupt);
    }

    match key.code {
        KeyCode::Char(c) => Some(Key::Char(c)),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Backspace => Some(Key::Backspace),
        KeyCode::Tab => Some(Key::Tab),
        KeyCode::Esc => Some(Key::Esc),
        _ => None,
    }
}

pub fn terminal_columns() -> usize {
    crossterm::terminal::size()
        .map(|(cols, _)| cols as usize)
        .unwrap_or(80)
}

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap())
}

fn char_width(c: char) -> usize {
    // East-Asian wide/fullwidth occupy two columns, everything else one.
    match c.width() {
        Some(2) => 2,
        _ => 1,
    }
}

/// Column count `text` occupies, after stripping ANSI color/cursor
/// sequences and newlines.
pub fn display_width(text: &str) -> usize {
    let stripped = ansi_regex().replace_all(text, "");
    stripped
        .chars()
        .filter(|c| *c != '\n')
        .map(char_width)
        .sum()
}

/// How many terminal rows `lines` occupy at `columns` width. An overlong
/// line wraps and costs one row per `columns` of width; an empty line
/// still costs one row.
pub fn rows_occupied(lines: &[String], columns: usize) -> usize {
    let columns = columns.max(1);
    lines
        .iter()
        .map(|line| display_width(line).div_ceil(columns).max(1))
        .sum()
}

/// Split a title for the presence display. Short titles are halved by
/// accumulated width into a details line and a state line; long titles are
/// packed greedily into lines of width <= 30.
pub fn wrap_title(name: &str) -> Vec<String> {
    let total = display_width(name);
    let chars: Vec<char> = name.chars().collect();

    if total < 60 {
        let mut first = String::new();
        let mut first_width = 0usize;
        let mut idx = 0;
        while first_width * 2 < total {
            first.push(chars[idx]);
            first_width += char_width(chars[idx]);
            idx += 1;
        }
        return vec![first, chars[idx..].iter().collect()];
    }

    let mut lines = Vec::new();
    let mut cur = String::new();
    let mut cur_width = 0usize;
    let mut idx = 0;
    while idx < chars.len() {
        while cur_width < 30 && idx < chars.len() {
            cur.push(chars[idx]);
            cur_width += char_width(chars[idx]);
            idx += 1;
        }
        lines.push(std::mem::take(&mut cur));
        cur_width = 0;
    }
    lines
}
