//! Host → compute events and the pending outbound queue.
//!
//! Every event the host wants to deliver is queued here first. The bridge
//! drains the queue strictly in submission order and writes an event into
//! the status channel only once the previous one has been acknowledged.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::VecDeque;

use crate::{
    error::{WireError, WireResult},
    status::{EventSlot, PayloadWriter, StatusCode},
};

/// Modifier keys held during a key press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        ctrl: false,
        shift: false,
        alt: false,
        meta: false,
    };

    pub const fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(m: KeyModifiers) -> Self {
        Self {
            ctrl: m.contains(KeyModifiers::CONTROL),
            shift: m.contains(KeyModifiers::SHIFT),
            alt: m.contains(KeyModifiers::ALT),
            meta: m.intersects(KeyModifiers::SUPER | KeyModifiers::META),
        }
    }
}

/// A key press as the engine receives it: a key name, a numeric key code
/// and four modifier flags
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyInput {
    pub key: String,
    pub code: i32,
    pub modifiers: Modifiers,
}

impl KeyInput {
    pub fn new(key: impl Into<String>, code: i32) -> Self {
        Self {
            key: key.into(),
            code,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Inline layout: code, ctrl, shift, alt, meta, then the key name
    pub(crate) fn write(&self, w: &mut PayloadWriter<'_>) -> WireResult<()> {
        w.push_i32(self.code)?;
        w.push_bool(self.modifiers.ctrl)?;
        w.push_bool(self.modifiers.shift)?;
        w.push_bool(self.modifiers.alt)?;
        w.push_bool(self.modifiers.meta)?;
        w.push_str(&self.key)
    }

    pub(crate) fn read(slot: &mut EventSlot<'_>) -> WireResult<Self> {
        let code = slot.read_i32()?;
        let modifiers = Modifiers {
            ctrl: slot.read_bool()?,
            shift: slot.read_bool()?,
            alt: slot.read_bool()?,
            meta: slot.read_bool()?,
        };
        let key = slot.read_string()?;
        Ok(Self {
            key,
            code,
            modifiers,
        })
    }
}

/// Translates a terminal key event into the browser-style name and code
/// pair the engine understands. Keys with no counterpart are handed back.
impl TryFrom<KeyEvent> for KeyInput {
    type Error = KeyCode;

    fn try_from(event: KeyEvent) -> Result<Self, Self::Error> {
        let (key, code) = match event.code {
            KeyCode::Char(c) => {
                let code = match c {
                    'a'..='z' => c.to_ascii_uppercase() as i32,
                    'A'..='Z' | '0'..='9' | ' ' => c as i32,
                    _ => 0,
                };
                (c.to_string(), code)
            }
            KeyCode::Backspace => ("Backspace".into(), 8),
            KeyCode::Tab | KeyCode::BackTab => ("Tab".into(), 9),
            KeyCode::Enter => ("Enter".into(), 13),
            KeyCode::Esc => ("Escape".into(), 27),
            KeyCode::PageUp => ("PageUp".into(), 33),
            KeyCode::PageDown => ("PageDown".into(), 34),
            KeyCode::End => ("End".into(), 35),
            KeyCode::Home => ("Home".into(), 36),
            KeyCode::Left => ("ArrowLeft".into(), 37),
            KeyCode::Up => ("ArrowUp".into(), 38),
            KeyCode::Right => ("ArrowRight".into(), 39),
            KeyCode::Down => ("ArrowDown".into(), 40),
            KeyCode::Insert => ("Insert".into(), 45),
            KeyCode::Delete => ("Delete".into(), 46),
            KeyCode::F(n @ 1..=24) => (format!("F{}", n), 111 + i32::from(n)),
            other => return Err(other),
        };

        let mut modifiers = Modifiers::from(event.modifiers);
        if event.code == KeyCode::BackTab {
            modifiers.shift = true;
        }
        Ok(Self {
            key,
            code,
            modifiers,
        })
    }
}

/// Oneshot completion handle for a queued event
pub type Completion = async_channel::Sender<WireResult<()>>;

/// An event waiting in the outbound queue
#[derive(Debug)]
pub enum HostEvent {
    Key(KeyInput),
    Resize { width: u32, height: u32 },
    Cmdline(String),
    /// Two-phase delivery of a dropped file
    DropFile {
        name: String,
        contents: Vec<u8>,
        done: Completion,
    },
    /// Two-phase delivery of clipboard text requested by the engine
    ClipboardText { text: String, done: Completion },
    /// Inline refusal of a clipboard read
    ClipboardError,
}

impl HostEvent {
    /// Status code that opens this event's exchange
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Key(_) => StatusCode::NotifyKey,
            Self::Resize { .. } => StatusCode::NotifyResize,
            Self::Cmdline(_) => StatusCode::RequestCmdline,
            Self::DropFile { .. } => StatusCode::RequestOpenFileBuf,
            Self::ClipboardText { .. } | Self::ClipboardError => StatusCode::RequestClipboardBuf,
        }
    }

    /// Whether delivery needs a negotiated buffer
    pub fn is_negotiated(&self) -> bool {
        matches!(self, Self::DropFile { .. } | Self::ClipboardText { .. })
    }
}

/// Inline layout of a resize: width, height
pub(crate) fn write_resize(w: &mut PayloadWriter<'_>, width: u32, height: u32) -> WireResult<()> {
    let to_word = |v: u32| {
        i32::try_from(v).map_err(|_| {
            let src = v.to_string();
            let len = src.len();
            miette::Report::from(WireError::encoding(src, (0, len), "dimension exceeds i32"))
        })
    };
    w.push_i32(to_word(width)?)?;
    w.push_i32(to_word(height)?)
}

/// FIFO of events not yet written to the status channel
#[derive(Debug, Default)]
pub struct OutboundQueue {
    events: VecDeque<HostEvent>,
    submitted: u64,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: HostEvent) {
        self.submitted += 1;
        self.events.push_back(event);
    }

    pub fn pop(&mut self) -> Option<HostEvent> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events ever submitted, delivered or not
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Fails every queued completion; used when the session ends
    pub fn abandon(&mut self, reason: &str) {
        for event in self.events.drain(..) {
            if let HostEvent::DropFile { done, .. } | HostEvent::ClipboardText { done, .. } = event {
                let _ = done.try_send(Err(WireError::channel_closed(reason.to_string(), (0, 0)).into()));
            }
        }
    }
}
