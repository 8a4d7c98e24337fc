//! Messages flowing over the non-blocking transport.
//!
//! Compute → host traffic always travels here. Host → compute traffic uses
//! this transport exactly once, for the [`StartOptions`] message; every later
//! host signal goes through the status channel.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    time::{SystemTime, UNIX_EPOCH},
};

use async_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::{
    buffer::SharedBuffer,
    draw::DrawEvent,
    error::{WireError, WireResult},
    status::StatusChannel,
};

/// Default capacity of the compute → host transport
pub const MAX_MESSAGES: usize = 1024;

/// Messages sent from the compute thread to the host
#[derive(Debug, Clone)]
pub enum Message {
    /// An ordered batch of draw primitives
    Draw(Vec<DrawEvent>),
    /// The engine failed at runtime
    Error { message: String },
    /// The engine finished initialising
    Started,
    /// The engine exited with a status
    Exit { status: i32 },
    /// Buffer for an incoming file, sized by the host's request
    OpenFileBufResponse { name: String, buffer: SharedBuffer },
    /// File bytes exported from the engine's namespace
    Export { path: String, contents: Vec<u8> },
    /// The engine wants the host clipboard text
    ReadClipboardRequest,
    /// Buffer for incoming clipboard text
    ClipboardBufResponse { buffer: SharedBuffer },
    /// The engine copied text to the clipboard
    WriteClipboard { text: String },
    /// Outcome of a command line request
    CmdlineResponse { success: bool },
}

/// Discriminant of [`Message`], used to key oneshot waiters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Draw,
    Error,
    Started,
    Exit,
    OpenFileBufResponse,
    Export,
    ReadClipboardRequest,
    ClipboardBufResponse,
    WriteClipboard,
    CmdlineResponse,
}

impl MessageKind {
    /// Name used on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draw => "draw",
            Self::Error => "error",
            Self::Started => "started",
            Self::Exit => "exit",
            Self::OpenFileBufResponse => "open-file-buf:response",
            Self::Export => "export",
            Self::ReadClipboardRequest => "read-clipboard:request",
            Self::ClipboardBufResponse => "clipboard-buf:response",
            Self::WriteClipboard => "write-clipboard",
            Self::CmdlineResponse => "cmdline:response",
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Draw(_) => MessageKind::Draw,
            Self::Error { .. } => MessageKind::Error,
            Self::Started => MessageKind::Started,
            Self::Exit { .. } => MessageKind::Exit,
            Self::OpenFileBufResponse { .. } => MessageKind::OpenFileBufResponse,
            Self::Export { .. } => MessageKind::Export,
            Self::ReadClipboardRequest => MessageKind::ReadClipboardRequest,
            Self::ClipboardBufResponse { .. } => MessageKind::ClipboardBufResponse,
            Self::WriteClipboard { .. } => MessageKind::WriteClipboard,
            Self::CmdlineResponse { .. } => MessageKind::CmdlineResponse,
        }
    }
}

/// A message plus the optional send time used for latency diagnostics
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: Message,
    /// Milliseconds since the UNIX epoch, set only in perf mode
    pub timestamp: Option<u64>,
}

impl Envelope {
    /// Milliseconds between the send timestamp and now
    pub fn latency_ms(&self) -> Option<u64> {
        self.timestamp
            .map(|sent| now_millis().saturating_sub(sent))
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The single initialisation message sent to the compute thread
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub debug: bool,
    pub perf: bool,
    /// Channel the host will use for every later event
    pub buffer: StatusChannel,
    /// Whether the host can serve clipboard reads
    pub clipboard: bool,
    pub canvas_dom_width: u32,
    pub canvas_dom_height: u32,
    /// Files preloaded into the engine namespace before it runs
    pub files: BTreeMap<String, Vec<u8>>,
    /// Directories created before the engine runs
    pub dirs: Vec<String>,
    /// Command-line arguments handed to the engine as-is
    pub cmd_args: Vec<String>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            debug: false,
            perf: false,
            buffer: StatusChannel::new(),
            clipboard: true,
            canvas_dom_width: 0,
            canvas_dom_height: 0,
            files: BTreeMap::new(),
            dirs: Vec::new(),
            cmd_args: Vec::new(),
        }
    }
}

/// Creates a connected compute → host transport
pub fn transport(capacity: usize) -> (Outbox, Inbox) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        Outbox { tx, perf: false },
        Inbox { rx },
    )
}

/// Sending half, owned by the compute thread
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: Sender<Envelope>,
    perf: bool,
}

impl Outbox {
    /// Stamps every following message with its send time
    pub fn set_perf(&mut self, perf: bool) {
        self.perf = perf;
    }

    /// Sends a message, blocking the calling thread while the transport is full
    pub fn send(&self, message: Message) -> WireResult<()> {
        let envelope = Envelope {
            message,
            timestamp: self.perf.then(now_millis),
        };
        self.tx
            .send_blocking(envelope)
            .map_err(|_| WireError::channel_closed("message transport", (0, 0)).into())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by the host
#[derive(Debug)]
pub struct Inbox {
    rx: Receiver<Envelope>,
}

impl Inbox {
    /// Waits for the next message; `None` once every sender is gone
    pub async fn recv(&self) -> Option<Envelope> {
        self.rx.recv().await.ok()
    }

    /// Non-blocking attempt to receive a message
    pub fn try_recv(&self) -> WireResult<Option<Envelope>> {
        match self.rx.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => {
                Err(WireError::channel_closed("message transport", (0, 0)).into())
            }
        }
    }

    pub fn close(&self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_message_kinds() {
        let msg = Message::OpenFileBufResponse {
            name: "hello.txt".into(),
            buffer: SharedBuffer::new(4),
        };
        assert_eq!(msg.kind(), MessageKind::OpenFileBufResponse);
        assert_eq!(msg.kind().to_string(), "open-file-buf:response");
        assert_eq!(Message::CmdlineResponse { success: true }.kind().as_str(), "cmdline:response");
    }

    #[test]
    fn test_transport_order_and_timestamps() {
        let (mut outbox, inbox) = transport(8);
        outbox.send(Message::Started).unwrap();
        outbox.set_perf(true);
        outbox.send(Message::Exit { status: 0 }).unwrap();

        let first = inbox.try_recv().unwrap().unwrap();
        assert_eq!(first.message.kind(), MessageKind::Started);
        assert!(first.timestamp.is_none());

        let second = smol::block_on(inbox.recv()).unwrap();
        assert!(matches!(second.message, Message::Exit { status: 0 }));
        assert!(second.timestamp.is_some());
        assert!(second.latency_ms().is_some());

        assert!(inbox.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_closed_transport() {
        let (outbox, inbox) = transport(1);
        inbox.close();
        assert!(outbox.is_closed());
        assert!(outbox.send(Message::Started).is_err());

        drop(outbox);
        assert!(inbox.try_recv().is_err());
    }
}
