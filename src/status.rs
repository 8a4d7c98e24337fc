//! Status channel: the shared single-slot mailbox between host and compute.
//!
//! Word 0 holds the current [`StatusCode`]; the remaining words carry the
//! inline payload of the pending event. The host may write only while word 0
//! is `NOT_SET`, and the compute thread must finish reading the payload
//! before it clears word 0, because clearing hands the storage back to the
//! host. Both rules are enforced here rather than left to callers:
//!
//! - [`StatusChannel::post`] refuses to touch any word while a status is
//!   pending.
//! - [`EventSlot`] borrows the payload for reading and only
//!   [`EventSlot::release`] (which consumes the slot) clears the status.

use std::{
    fmt::{self, Display},
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use async_channel::{bounded, Receiver, Sender};

use crate::error::{WireError, WireResult};

/// Number of 32-bit words in the channel, status word included
pub const STATUS_WORDS: usize = 256;

/// Index of the status word
pub const STATUS: usize = 0;

/// Event codes stored in the status word.
///
/// The ordinals are part of the wire contract with existing engine builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    NotSet = 0,
    NotifyKey = 1,
    NotifyResize = 2,
    RequestOpenFileBuf = 3,
    NotifyOpenFileBufComplete = 4,
    RequestClipboardBuf = 5,
    NotifyClipboardWriteComplete = 6,
    RequestCmdline = 7,
}

impl StatusCode {
    /// Decodes a raw status word
    pub const fn from_word(word: i32) -> Option<Self> {
        Some(match word {
            0 => Self::NotSet,
            1 => Self::NotifyKey,
            2 => Self::NotifyResize,
            3 => Self::RequestOpenFileBuf,
            4 => Self::NotifyOpenFileBufComplete,
            5 => Self::RequestClipboardBuf,
            6 => Self::NotifyClipboardWriteComplete,
            7 => Self::RequestCmdline,
            _ => return None,
        })
    }

    #[inline]
    pub const fn word(self) -> i32 {
        self as i32
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotSet => "NOT_SET",
            Self::NotifyKey => "NOTIFY_KEY",
            Self::NotifyResize => "NOTIFY_RESIZE",
            Self::RequestOpenFileBuf => "REQUEST_OPEN_FILE_BUF",
            Self::NotifyOpenFileBufComplete => "NOTIFY_OPEN_FILE_BUF_COMPLETE",
            Self::RequestClipboardBuf => "REQUEST_CLIPBOARD_BUF",
            Self::NotifyClipboardWriteComplete => "NOTIFY_CLIPBOARD_WRITE_COMPLETE",
            Self::RequestCmdline => "REQUEST_CMDLINE",
        };
        write!(f, "{}({})", name, self.word())
    }
}

/// Result of a blocking [`StatusChannel::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The word no longer holds the expected value
    Changed,
    /// The timeout elapsed with the word unchanged
    TimedOut,
    /// The channel was closed; no further event will arrive
    Closed,
}

#[derive(Debug)]
struct Shared {
    words: Box<[AtomicI32]>,
    gate: Mutex<()>,
    wake: Condvar,
    closed: AtomicBool,
    ack_tx: Sender<()>,
    ack_rx: Receiver<()>,
}

/// Shared integer array with futex-like wait/notify on any word.
///
/// Cloning yields another handle to the same storage.
#[derive(Debug, Clone)]
pub struct StatusChannel {
    shared: Arc<Shared>,
}

impl StatusChannel {
    pub fn new() -> Self {
        Self::with_words(STATUS_WORDS)
    }

    /// Creates a channel with `words` words; at least the status word and one
    /// payload word are always allocated.
    pub fn with_words(words: usize) -> Self {
        let words = words.max(2);
        let (ack_tx, ack_rx) = bounded(1);
        Self {
            shared: Arc::new(Shared {
                words: (0..words).map(|_| AtomicI32::new(0)).collect(),
                gate: Mutex::new(()),
                wake: Condvar::new(),
                closed: AtomicBool::new(false),
                ack_tx,
                ack_rx,
            }),
        }
    }

    /// Number of words, status word included
    pub fn capacity(&self) -> usize {
        self.shared.words.len()
    }

    #[inline]
    pub fn load(&self, word: usize) -> i32 {
        self.shared.words[word].load(Ordering::Acquire)
    }

    #[inline]
    pub fn store(&self, word: usize, value: i32) {
        self.shared.words[word].store(value, Ordering::Release);
    }

    /// Wakes every thread blocked in [`wait`](Self::wait)
    pub fn notify(&self) {
        let _gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.wake.notify_all();
    }

    /// Ends the channel: every blocked and future [`wait`](Self::wait)
    /// returns [`WaitOutcome::Closed`] and posts are refused.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.ack_tx.close();
        self.notify();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Blocks until `word` differs from `expected`, `timeout` elapses or the
    /// channel is closed.
    ///
    /// Spurious wake-ups re-block until the deadline; `None` waits forever.
    pub fn wait(&self, word: usize, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if self.is_closed() {
                return WaitOutcome::Closed;
            }
            if self.load(word) != expected {
                return WaitOutcome::Changed;
            }

            gate = match deadline {
                None => self
                    .shared
                    .wake
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    self.shared
                        .wake
                        .wait_timeout(gate, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Raw value of the status word
    #[inline]
    pub fn status_word(&self) -> i32 {
        self.load(STATUS)
    }

    /// Whether the host currently owns the turn
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.status_word() == StatusCode::NotSet.word()
    }

    /// Writes an event: payload first, then the status word, then wakes the
    /// compute thread.
    ///
    /// Fails without touching any word if another event is still pending.
    pub fn post<F>(&self, code: StatusCode, write: F) -> WireResult<()>
    where
        F: FnOnce(&mut PayloadWriter<'_>) -> WireResult<()>,
    {
        if self.is_closed() {
            let src = format!("post {}", code);
            let len = src.len();
            return Err(WireError::channel_closed(src, (0, len)).into());
        }
        let pending = self.status_word();
        if pending != StatusCode::NotSet.word() || code == StatusCode::NotSet {
            let src = format!("post {} while status word is {}", code, pending);
            let len = src.len();
            return Err(WireError::protocol(
                src,
                (0, len),
                "status channel is occupied by an unacknowledged event",
            )
            .into());
        }

        let mut writer = PayloadWriter {
            channel: self,
            cursor: STATUS + 1,
        };
        write(&mut writer)?;

        self.store(STATUS, code.word());
        self.notify();
        Ok(())
    }

    /// Resolves once the status word is back to `NOT_SET`.
    ///
    /// Never blocks the calling thread; it parks the task on the
    /// acknowledgement signal raised by [`EventSlot::release`].
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            if self.shared.ack_rx.recv().await.is_err() {
                return;
            }
        }
    }

    /// Takes the pending event for reading, if any
    pub fn slot(&self) -> Option<EventSlot<'_>> {
        let status = self.status_word();
        (status != StatusCode::NotSet.word()).then(|| EventSlot {
            channel: self,
            status,
            cursor: STATUS + 1,
            released: false,
        })
    }

    fn clear(&self) {
        self.store(STATUS, StatusCode::NotSet.word());
        let _ = self.shared.ack_tx.try_send(());
        self.notify();
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential writer over the payload words of a channel
#[derive(Debug)]
pub struct PayloadWriter<'a> {
    channel: &'a StatusChannel,
    cursor: usize,
}

impl PayloadWriter<'_> {
    pub fn push_i32(&mut self, value: i32) -> WireResult<()> {
        if self.cursor >= self.channel.capacity() {
            let src = format!("payload word {}", self.cursor);
            let len = src.len();
            return Err(WireError::encoding(src, (0, len), "payload exceeds inline capacity").into());
        }
        self.channel.shared.words[self.cursor].store(value, Ordering::Relaxed);
        self.cursor += 1;
        Ok(())
    }

    pub fn push_bool(&mut self, value: bool) -> WireResult<()> {
        self.push_i32(i32::from(value))
    }

    /// Writes a length word followed by one code point per word
    pub fn push_str(&mut self, text: &str) -> WireResult<()> {
        let chars = text.chars().count();
        let available = self.channel.capacity().saturating_sub(self.cursor + 1);
        if chars > available {
            let start = text
                .char_indices()
                .nth(available)
                .map_or(text.len(), |(i, _)| i);
            return Err(WireError::encoding(
                text.to_string(),
                (start, text.len() - start),
                format!(
                    "{} characters do not fit in {} free payload words",
                    chars, available
                ),
            )
            .into());
        }

        self.push_i32(chars as i32)?;
        for c in text.chars() {
            self.push_i32(c as i32)?;
        }
        Ok(())
    }

    /// Payload words written so far, status word excluded
    pub fn written(&self) -> usize {
        self.cursor - (STATUS + 1)
    }
}

/// Read access to the pending event.
///
/// All payload reads happen through this guard; [`release`](Self::release)
/// consumes it, so the status word is cleared only after decoding is done.
/// A slot dropped without an explicit release still clears the status so
/// the host is never left waiting on an acknowledgement.
#[derive(Debug)]
pub struct EventSlot<'a> {
    channel: &'a StatusChannel,
    status: i32,
    cursor: usize,
    released: bool,
}

impl EventSlot<'_> {
    /// Raw status word observed when the slot was taken
    pub fn status_word(&self) -> i32 {
        self.status
    }

    pub fn code(&self) -> Option<StatusCode> {
        StatusCode::from_word(self.status)
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        debug_assert_eq!(
            self.channel.status_word(),
            self.status,
            "payload read after the status word changed"
        );
        if self.cursor >= self.channel.capacity() {
            return Err(self.corrupt("payload read past the end of the channel"));
        }
        let value = self.channel.shared.words[self.cursor].load(Ordering::Relaxed);
        self.cursor += 1;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_i32()? != 0)
    }

    /// Reads a length word followed by that many code point words
    pub fn read_string(&mut self) -> WireResult<String> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| self.corrupt(format!("negative inline string length {}", len)))?;
        if self.cursor + len > self.channel.capacity() {
            return Err(self.corrupt(format!("inline string of {} words overruns the channel", len)));
        }

        let mut text = String::with_capacity(len);
        for _ in 0..len {
            let word = self.read_i32()?;
            let c = char::from_u32(word as u32)
                .ok_or_else(|| self.corrupt(format!("invalid code point {:#x}", word)))?;
            text.push(c);
        }
        Ok(text)
    }

    /// Payload words consumed so far
    pub fn words_read(&self) -> usize {
        self.cursor - (STATUS + 1)
    }

    /// Clears the status word, handing the channel back to the host
    pub fn release(mut self) {
        self.released = true;
        self.channel.clear();
    }

    fn corrupt(&self, msg: impl Into<String>) -> miette::Report {
        let src = format!("status {} payload word {}", self.status, self.cursor);
        let len = src.len();
        WireError::protocol(src, (0, len), msg).into()
    }
}

impl Drop for EventSlot<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.channel.clear();
        }
    }
}
