//! The compute side: a blocking engine driven through the status channel.
//!
//! A [`ComputeRuntime`] is built once when the compute thread starts and owns
//! everything the engine can reach: the status channel, the message outbox,
//! the draw batcher and the in-memory file namespace. The engine receives it
//! as a [`Context`] in every callback, so there is no global state.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicBool, Ordering},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use async_channel::{bounded, Receiver, Sender};
use tracing::{debug, error};

use crate::{
    buffer::SharedBuffer,
    draw::{DrawBatcher, DrawEvent},
    error::{wire_error, WireError, WireResult},
    event::KeyInput,
    message::{Message, Outbox, StartOptions},
    status::{StatusChannel, StatusCode, WaitOutcome, STATUS},
};

/// Engine entry points invoked by the compute loop
pub trait Engine: Send {
    /// The engine's main loop, returning the exit status.
    ///
    /// It is expected to call [`Context::wait_for_event`] whenever it needs
    /// input.
    fn run(&mut self, cx: &mut Context) -> WireResult<i32>;

    fn handle_key(&mut self, cx: &mut Context, key: &KeyInput);

    fn handle_resize(&mut self, cx: &mut Context, width: u32, height: u32);

    /// A dropped file has been materialised at `path`
    fn handle_drop(&mut self, cx: &mut Context, path: &str);

    fn set_clipboard_available(&mut self, available: bool);

    /// Executes a command line, returning whether it succeeded
    fn run_command(&mut self, cx: &mut Context, cmdline: &str) -> bool;
}

/// Outcome of one [`Context::wait_for_event`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// The event handled, `None` when the timeout elapsed first
    pub status: Option<StatusCode>,
    pub elapsed: Duration,
}

/// The engine's file namespace
#[derive(Debug, Default, Clone)]
pub struct FileNamespace {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl FileNamespace {
    pub fn write(&mut self, path: impl Into<String>, contents: Vec<u8>) {
        self.files.insert(path.into(), contents);
    }

    pub fn read(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn create_dir(&mut self, path: impl Into<String>) {
        self.dirs.insert(path.into());
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }
}

#[derive(Debug)]
struct OpenFileContext {
    name: String,
    buffer: SharedBuffer,
}

/// Everything an engine callback may touch
#[derive(Debug)]
pub struct Context {
    channel: StatusChannel,
    outbox: Outbox,
    batcher: DrawBatcher,
    viewport: (u32, u32),
    open_file: Option<OpenFileContext>,
    clipboard_available: bool,
    files: FileNamespace,
    cmd_args: Vec<String>,
    debug: bool,
}

impl Context {
    fn new(outbox: Outbox) -> Self {
        Self {
            channel: StatusChannel::new(),
            outbox,
            batcher: DrawBatcher::new(),
            viewport: (0, 0),
            open_file: None,
            clipboard_available: true,
            files: FileNamespace::default(),
            cmd_args: Vec::new(),
            debug: false,
        }
    }

    /// Cached viewport size, as last reported by the host
    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn clipboard_available(&self) -> bool {
        self.clipboard_available
    }

    /// Arguments the host passed in the start message
    pub fn cmd_args(&self) -> &[String] {
        &self.cmd_args
    }

    pub fn files(&self) -> &FileNamespace {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FileNamespace {
        &mut self.files
    }

    /// Queues a draw primitive for the next batch
    #[inline]
    pub fn draw(&mut self, event: DrawEvent) {
        self.batcher.push(event);
    }

    /// Ships pending draw primitives as one batch
    pub fn flush(&mut self) -> WireResult<()> {
        match self.batcher.take() {
            Some(batch) => self.outbox.send(Message::Draw(batch)),
            None => Ok(()),
        }
    }

    /// Sends a message after any draw primitives emitted before it
    pub fn send(&mut self, message: Message) -> WireResult<()> {
        self.flush()?;
        self.outbox.send(message)
    }

    /// Waits for the next host event and dispatches it to `engine`.
    ///
    /// Pending draws are flushed before blocking. A timeout is not an error:
    /// the report simply carries no status.
    pub fn wait_for_event<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        timeout: Option<Duration>,
    ) -> WireResult<WaitReport> {
        self.flush()?;
        let start = Instant::now();

        let status = self.wait_for_status_changed(timeout)?;
        if status == StatusCode::NotSet.word() {
            if self.debug {
                debug!(?timeout, "no event before timeout");
            }
            return Ok(WaitReport {
                status: None,
                elapsed: start.elapsed(),
            });
        }

        let code = self.handle_event(engine)?;
        let elapsed = start.elapsed();
        if self.debug {
            debug!(status = %code, ?elapsed, "event handled");
        }
        Ok(WaitReport {
            status: Some(code),
            elapsed,
        })
    }

    /// Blocks until the status word holds `expected`, dispatching any other
    /// event that arrives in the meantime. The status is left set so the
    /// caller can read its payload.
    pub fn wait_until<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        expected: StatusCode,
    ) -> WireResult<()> {
        self.flush()?;
        loop {
            let status = self.wait_for_status_changed(None)?;
            if status == expected.word() {
                return Ok(());
            }
            if status == StatusCode::NotSet.word() {
                continue;
            }
            let handled = self.handle_event(engine)?;
            if self.debug {
                debug!(status = %handled, waiting_for = %expected, "event handled while waiting");
            }
        }
    }

    fn wait_for_status_changed(&self, timeout: Option<Duration>) -> WireResult<i32> {
        let status = self.channel.status_word();
        if status != StatusCode::NotSet.word() {
            return Ok(status);
        }
        match self.channel.wait(STATUS, StatusCode::NotSet.word(), timeout) {
            WaitOutcome::Closed => Err(WireError::channel_closed("wait for host event", (0, 19)).into()),
            WaitOutcome::Changed | WaitOutcome::TimedOut => Ok(self.channel.status_word()),
        }
    }

    /// Decodes and dispatches the pending event.
    ///
    /// Every branch finishes reading the payload before releasing the slot,
    /// and releases it before calling into the engine, which may itself
    /// start another exchange with the host.
    fn handle_event<E: Engine + ?Sized>(&mut self, engine: &mut E) -> WireResult<StatusCode> {
        let channel = self.channel.clone();
        let Some(mut slot) = channel.slot() else {
            return Err(unknown_status(StatusCode::NotSet.word()));
        };

        let code = match slot.code() {
            Some(StatusCode::NotifyKey) => {
                let key = KeyInput::read(&mut slot)?;
                slot.release();
                engine.handle_key(self, &key);
                StatusCode::NotifyKey
            }
            Some(StatusCode::NotifyResize) => {
                let width = slot.read_i32()?;
                let height = slot.read_i32()?;
                slot.release();
                let width = u32::try_from(width).unwrap_or(0);
                let height = u32::try_from(height).unwrap_or(0);
                self.viewport = (width, height);
                engine.handle_resize(self, width, height);
                StatusCode::NotifyResize
            }
            Some(StatusCode::RequestOpenFileBuf) => {
                let size = slot.read_i32()?;
                let name = slot.read_string()?;
                slot.release();
                self.handle_open_file_request(size, name)?;
                StatusCode::RequestOpenFileBuf
            }
            Some(StatusCode::NotifyOpenFileBufComplete) => {
                slot.release();
                self.handle_open_file_complete(engine)?;
                StatusCode::NotifyOpenFileBufComplete
            }
            Some(StatusCode::RequestCmdline) => {
                let cmdline = slot.read_string()?;
                // Cleared before running: the command may talk to the host
                slot.release();
                if self.debug {
                    debug!(%cmdline, "running command line");
                }
                let success = engine.run_command(self, &cmdline);
                self.send(Message::CmdlineResponse { success })?;
                StatusCode::RequestCmdline
            }
            _ => {
                let word = slot.status_word();
                drop(slot);
                return Err(unknown_status(word));
            }
        };
        Ok(code)
    }

    fn handle_open_file_request(&mut self, size: i32, name: String) -> WireResult<()> {
        if let Some(open) = &self.open_file {
            let src = format!("open {} while {} is pending", name, open.name);
            let len = src.len();
            return Err(WireError::protocol(src, (0, len), "a file transfer is already in progress").into());
        }
        let size = usize::try_from(size).map_err(|_| {
            let src = size.to_string();
            let len = src.len();
            miette::Report::from(WireError::protocol(src, (0, len), "negative file size"))
        })?;

        let buffer = SharedBuffer::new(size);
        if self.debug {
            debug!(%name, size, "allocated open-file buffer");
        }
        self.open_file = Some(OpenFileContext {
            name: name.clone(),
            buffer: buffer.clone(),
        });
        self.send(Message::OpenFileBufResponse { name, buffer })
    }

    fn handle_open_file_complete<E: Engine + ?Sized>(&mut self, engine: &mut E) -> WireResult<()> {
        let Some(OpenFileContext { name, buffer }) = self.open_file.take() else {
            let src = StatusCode::NotifyOpenFileBufComplete.to_string();
            let len = src.len();
            return Err(WireError::protocol(src, (0, len), "file write completed but no transfer is open").into());
        };

        let path = format!("/{}", name);
        self.files.write(path.clone(), buffer.to_vec());
        if self.debug {
            debug!(%path, bytes = buffer.len(), "materialised dropped file");
        }
        engine.handle_drop(self, &path);
        Ok(())
    }

    /// Asks the host for its clipboard text, blocking until it arrives.
    ///
    /// Returns `None` when the clipboard is unavailable. A host-side failure
    /// disables the clipboard for the rest of the session.
    pub fn read_clipboard<E: Engine + ?Sized>(&mut self, engine: &mut E) -> WireResult<Option<String>> {
        if !self.clipboard_available {
            return Ok(None);
        }

        self.send(Message::ReadClipboardRequest)?;
        self.wait_until(engine, StatusCode::RequestClipboardBuf)?;

        let channel = self.channel.clone();
        let Some(mut slot) = channel.slot() else {
            return Err(unknown_status(StatusCode::NotSet.word()));
        };
        let is_error = slot.read_bool()?;
        let len = slot.read_i32()?;
        slot.release();

        if is_error {
            if self.debug {
                debug!("host could not read the clipboard, disabling it");
            }
            self.clipboard_available = false;
            engine.set_clipboard_available(false);
            return Ok(None);
        }

        let len = usize::try_from(len).unwrap_or(0);
        let buffer = SharedBuffer::new(len);
        self.send(Message::ClipboardBufResponse {
            buffer: buffer.clone(),
        })?;
        self.wait_until(engine, StatusCode::NotifyClipboardWriteComplete)?;
        if let Some(slot) = channel.slot() {
            slot.release();
        }

        let text = String::from_utf8_lossy(&buffer.read(len)).into_owned();
        Ok(Some(text))
    }

    /// Hands text to the host clipboard; no reply is expected
    pub fn write_clipboard(&mut self, text: impl Into<String>) -> WireResult<()> {
        self.send(Message::WriteClipboard { text: text.into() })
    }

    /// Ships a file from the namespace to the host.
    ///
    /// Returns `false` when the path does not exist.
    pub fn export_file(&mut self, path: &str) -> WireResult<bool> {
        let Some(contents) = self.files.read(path).map(<[u8]>::to_vec) else {
            if self.debug {
                debug!(%path, "could not export missing file");
            }
            return Ok(false);
        };
        self.send(Message::Export {
            path: path.to_string(),
            contents,
        })?;
        Ok(true)
    }
}

fn unknown_status(word: i32) -> miette::Report {
    let src = format!("status word {}", word);
    let len = src.len();
    WireError::protocol(src, (0, len), "unknown event status").into()
}

/// The single runtime instance of a compute thread
#[derive(Debug)]
pub struct ComputeRuntime<E> {
    cx: Context,
    engine: E,
    started: bool,
}

impl<E: Engine> ComputeRuntime<E> {
    pub fn new(engine: E, outbox: Outbox) -> Self {
        Self {
            cx: Context::new(outbox),
            engine,
            started: false,
        }
    }

    /// Applies the start message and runs the engine to completion.
    ///
    /// Exactly one of `exit` or `error` is sent when the engine stops.
    pub fn start(&mut self, options: StartOptions) -> WireResult<i32> {
        if self.started {
            return Err(WireError::protocol(
                "start",
                (0, 5),
                "engine cannot start because it is already running",
            )
            .into());
        }
        self.started = true;

        let cx = &mut self.cx;
        cx.channel = options.buffer;
        cx.debug = options.debug;
        cx.outbox.set_perf(options.perf);
        cx.viewport = (options.canvas_dom_width, options.canvas_dom_height);
        cx.cmd_args = options.cmd_args;
        for dir in options.dirs {
            cx.files.create_dir(dir);
        }
        for (path, contents) in options.files {
            cx.files.write(path, contents);
        }
        if !options.clipboard {
            cx.clipboard_available = false;
            self.engine.set_clipboard_available(false);
        }

        cx.send(Message::Started)?;
        match self.engine.run(&mut self.cx) {
            Ok(status) => {
                self.cx.send(Message::Exit { status })?;
                Ok(status)
            }
            Err(err) => {
                error!("engine stopped with error: {}", err);
                // Engine errors travel bare; the host wraps them again
                let message = match wire_error(&err) {
                    Some(WireError::Engine { msg }) => msg.clone(),
                    _ => err.to_string(),
                };
                self.cx.send(Message::Error { message })?;
                Err(err)
            }
        }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

/// Handle to a spawned compute thread
#[derive(Debug)]
pub struct ComputeHandle {
    start_tx: Sender<StartOptions>,
    start_sent: AtomicBool,
    thread: Option<JoinHandle<()>>,
}

impl ComputeHandle {
    /// Sends the start message; a second call is a protocol violation
    pub fn start(&self, options: StartOptions) -> WireResult<()> {
        if self.start_sent.swap(true, Ordering::AcqRel) {
            return Err(WireError::protocol("start", (0, 5), "start message already sent").into());
        }
        self.start_tx
            .try_send(options)
            .map_err(|_| WireError::channel_closed("start message", (0, 0)).into())
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the compute thread; returns `false` if it panicked
    pub fn join(mut self) -> bool {
        self.thread.take().map_or(true, |t| t.join().is_ok())
    }
}

/// Spawns the compute thread. The engine does nothing until
/// [`ComputeHandle::start`] delivers the start message.
pub fn spawn_compute<E>(engine: E, outbox: Outbox) -> WireResult<ComputeHandle>
where
    E: Engine + 'static,
{
    let (start_tx, start_rx): (Sender<StartOptions>, Receiver<StartOptions>) = bounded(1);

    let thread = thread::Builder::new()
        .name("oxiwire-compute".to_string())
        .spawn(move || {
            let Ok(options) = start_rx.recv_blocking() else {
                return;
            };
            let mut runtime = ComputeRuntime::new(engine, outbox);
            if let Err(err) = runtime.start(options) {
                debug!("compute thread finished with error: {}", err);
            }
        })
        .map_err(|e| WireError::resource(format!("failed to spawn compute thread: {}", e)))?;

    Ok(ComputeHandle {
        start_tx,
        start_sent: AtomicBool::new(false),
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::wire_error,
        message::{transport, Envelope, Inbox},
        testing::{Call, ScriptedEngine},
    };
    use pretty_assertions::assert_eq;

    fn recv(inbox: &Inbox) -> Envelope {
        smol::block_on(inbox.recv()).expect("compute thread hung up")
    }

    fn recv_kind(inbox: &Inbox, kind: crate::message::MessageKind) -> Message {
        loop {
            let envelope = recv(inbox);
            if envelope.message.kind() == kind {
                return envelope.message;
            }
        }
    }

    fn post_and_wait(channel: &StatusChannel, code: StatusCode, f: impl FnOnce(&mut crate::status::PayloadWriter<'_>) -> WireResult<()>) {
        channel.post(code, f).unwrap();
        smol::block_on(channel.wait_idle());
    }

    fn start(engine: ScriptedEngine) -> (StatusChannel, Inbox, ComputeHandle) {
        let (outbox, inbox) = transport(64);
        let channel = StatusChannel::new();
        let handle = spawn_compute(engine, outbox).unwrap();
        handle
            .start(StartOptions {
                buffer: channel.clone(),
                canvas_dom_width: 800,
                canvas_dom_height: 600,
                ..StartOptions::default()
            })
            .unwrap();
        assert!(matches!(recv(&inbox).message, Message::Started));
        (channel, inbox, handle)
    }

    fn quit(channel: &StatusChannel, inbox: &Inbox, handle: ComputeHandle) {
        post_and_wait(channel, StatusCode::RequestCmdline, |w| w.push_str("qall!"));
        assert!(matches!(
            recv_kind(inbox, crate::message::MessageKind::Exit),
            Message::Exit { status: 0 }
        ));
        assert!(handle.join());
    }

    #[test]
    fn test_key_event_decoded_on_compute_side() {
        let engine = ScriptedEngine::new();
        let calls = engine.calls();
        let (channel, inbox, handle) = start(engine);

        let key = KeyInput::new("Escape", 27).with_modifiers(crate::event::Modifiers {
            ctrl: false,
            shift: true,
            alt: false,
            meta: true,
        });
        post_and_wait(&channel, StatusCode::NotifyKey, |w| key.write(w));
        quit(&channel, &inbox, handle);

        assert_eq!(calls.lock().unwrap()[0], Call::Key(key));
    }

    #[test]
    fn test_resize_updates_viewport() {
        let engine = ScriptedEngine::new();
        let calls = engine.calls();
        let (channel, inbox, handle) = start(engine);

        post_and_wait(&channel, StatusCode::NotifyResize, |w| {
            w.push_i32(1024)?;
            w.push_i32(0)
        });
        post_and_wait(&channel, StatusCode::RequestCmdline, |w| w.push_str("size"));
        quit(&channel, &inbox, handle);

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], Call::Resize(1024, 0));
        assert_eq!(calls[2], Call::Viewport(1024, 0));
    }

    #[test]
    fn test_command_replies_after_draws() {
        let engine = ScriptedEngine::new();
        let (channel, inbox, handle) = start(engine);

        post_and_wait(&channel, StatusCode::RequestCmdline, |w| w.push_str("draw"));

        let Message::Draw(batch) = recv(&inbox).message else {
            panic!("expected the draw batch first");
        };
        let methods: Vec<_> = batch.iter().map(DrawEvent::method).collect();
        assert_eq!(methods, vec!["setFont", "drawText", "drawRect"]);
        assert!(matches!(
            recv(&inbox).message,
            Message::CmdlineResponse { success: true }
        ));

        quit(&channel, &inbox, handle);
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let (outbox, _inbox) = transport(16);
        let mut cx = Context::new(outbox);
        let channel = cx.channel.clone();
        let mut engine = ScriptedEngine::new();

        channel.store(STATUS, 42);
        let err = cx.wait_for_event(&mut engine, Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(wire_error(&err), Some(WireError::Protocol { .. })));
        assert!(err.to_string().contains("unknown event status"));
    }

    #[test]
    fn test_timeout_is_not_an_error() {
        let (outbox, _inbox) = transport(16);
        let mut cx = Context::new(outbox);
        let mut engine = ScriptedEngine::new();

        let report = cx
            .wait_for_event(&mut engine, Some(Duration::from_millis(15)))
            .unwrap();
        assert_eq!(report.status, None);
        assert!(report.elapsed >= Duration::from_millis(15));
    }

    #[test]
    fn test_closed_channel_ends_every_wait() {
        let (outbox, _inbox) = transport(16);
        let mut cx = Context::new(outbox);
        let mut engine = ScriptedEngine::new();

        let closer = cx.channel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            closer.close();
        });
        let err = cx.wait_for_event(&mut engine, None).unwrap_err();
        handle.join().unwrap();
        assert!(matches!(wire_error(&err), Some(WireError::ChannelClosed { .. })));

        let err = cx.wait_until(&mut engine, StatusCode::NotifyClipboardWriteComplete).unwrap_err();
        assert!(matches!(wire_error(&err), Some(WireError::ChannelClosed { .. })));
    }

    #[test]
    fn test_second_open_file_request_is_fatal() {
        let (outbox, inbox) = transport(16);
        let mut cx = Context::new(outbox);
        let channel = cx.channel.clone();
        let mut engine = ScriptedEngine::new();

        channel
            .post(StatusCode::RequestOpenFileBuf, |w| {
                w.push_i32(4)?;
                w.push_str("a.txt")
            })
            .unwrap();
        cx.wait_for_event(&mut engine, None).unwrap();
        assert!(matches!(
            inbox.try_recv().unwrap().unwrap().message,
            Message::OpenFileBufResponse { .. }
        ));

        channel
            .post(StatusCode::RequestOpenFileBuf, |w| {
                w.push_i32(4)?;
                w.push_str("b.txt")
            })
            .unwrap();
        let err = cx.wait_for_event(&mut engine, None).unwrap_err();
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn test_complete_without_request_is_fatal() {
        let (outbox, _inbox) = transport(16);
        let mut cx = Context::new(outbox);
        let channel = cx.channel.clone();
        let mut engine = ScriptedEngine::new();

        channel
            .post(StatusCode::NotifyOpenFileBufComplete, |_| Ok(()))
            .unwrap();
        let err = cx.wait_for_event(&mut engine, None).unwrap_err();
        assert!(err.to_string().contains("no transfer is open"));
        assert!(channel.is_idle());
    }

    #[test]
    fn test_export_missing_file_is_in_band() {
        let (outbox, inbox) = transport(16);
        let mut cx = Context::new(outbox);
        assert!(!cx.export_file("/missing.txt").unwrap());

        cx.files_mut().write("/present.txt", b"abc".to_vec());
        assert!(cx.export_file("/present.txt").unwrap());
        let Message::Export { path, contents } = inbox.try_recv().unwrap().unwrap().message else {
            panic!("expected export");
        };
        assert_eq!(path, "/present.txt");
        assert_eq!(contents, b"abc".to_vec());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (outbox, _inbox) = transport(16);
        let handle = spawn_compute(ScriptedEngine::new(), outbox).unwrap();
        let channel = StatusChannel::new();
        handle
            .start(StartOptions {
                buffer: channel.clone(),
                ..StartOptions::default()
            })
            .unwrap();
        let err = handle.start(StartOptions::default()).unwrap_err();
        assert!(matches!(wire_error(&err), Some(WireError::Protocol { .. })));

        channel
            .post(StatusCode::RequestCmdline, |w| w.push_str("qall!"))
            .unwrap();
        assert!(handle.join());
    }

    #[test]
    fn test_start_options_preload_namespace() {
        let (outbox, inbox) = transport(16);
        let mut runtime = ComputeRuntime::new(ScriptedEngine::exiting_immediately(), outbox);
        let mut files = BTreeMap::new();
        files.insert("/etc/motd".to_string(), b"hi".to_vec());

        let status = runtime
            .start(StartOptions {
                clipboard: false,
                files,
                dirs: vec!["/work".into()],
                cmd_args: vec!["-u".into(), "NONE".into()],
                ..StartOptions::default()
            })
            .unwrap();

        assert_eq!(status, 0);
        assert_eq!(runtime.context().cmd_args(), ["-u", "NONE"]);
        assert_eq!(runtime.context().files().read("/etc/motd"), Some(&b"hi"[..]));
        assert!(runtime.context().files().is_dir("/work"));
        assert!(!runtime.context().clipboard_available());
        assert_eq!(
            runtime.engine().recorded(),
            vec![
                Call::ClipboardAvailable(false),
                Call::Args(vec!["-u".into(), "NONE".into()]),
            ]
        );
        assert!(matches!(inbox.try_recv().unwrap().unwrap().message, Message::Started));
        assert!(matches!(inbox.try_recv().unwrap().unwrap().message, Message::Exit { status: 0 }));
        assert!(runtime.start(StartOptions::default()).is_err());
    }
}
