//! Host bridge: the non-blocking side of the protocol.
//!
//! The [`Bridge`] owns the status channel and the receiving end of the
//! message transport. Its public operations never block the host thread:
//! simple events are written straight into the status channel when it is
//! free and queued otherwise, while request/response operations resolve once
//! the matching message comes back from the compute thread.
//!
//! [`Bridge::run`] drives the session. It multiplexes four loops on the
//! calling task:
//!
//! - **dispatch**: demultiplexes inbound messages by kind
//! - **pump**: drains the outbound queue one exchange at a time
//! - **clipboard**: serves the engine's clipboard reads
//! - **ticker**: applies queued draw batches once per tick

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_channel::{bounded, unbounded, Receiver, Sender};
use futures_lite::future::{self, Boxed};
use smol::Timer;
use tracing::{debug, error, trace, warn};

use crate::{
    compute::{spawn_compute, ComputeHandle, Engine},
    draw::{Screen, Surface},
    error::{wire_error, WireError, WireResult},
    event::{write_resize, HostEvent, KeyInput, OutboundQueue},
    message::{transport, Envelope, Inbox, Message, MessageKind, StartOptions, MAX_MESSAGES},
    state::{SessionSnapshot, SessionState},
    status::{StatusChannel, StatusCode},
};

/// Payload words a key event uses before its name
const KEY_HEADER_WORDS: usize = 5;
/// Payload words a file request uses before its name
const FILE_HEADER_WORDS: usize = 1;

/// Optional host callbacks, injected once at construction
pub trait HostHandlers: Send {
    fn on_started(&mut self) {}

    fn on_exit(&mut self, _status: i32) {}

    /// Engine errors and protocol violations; both end the session
    fn on_error(&mut self, _err: &miette::Report) {}

    fn on_export(&mut self, _path: &str, _contents: &[u8]) {}

    /// Starts reading the host clipboard. `None` means no clipboard access.
    fn read_clipboard(&mut self) -> Option<Boxed<WireResult<String>>> {
        None
    }

    fn on_write_clipboard(&mut self, _text: &str) {}
}

/// Handler set that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHandlers;

impl HostHandlers for NoHandlers {}

/// Host-side tuning
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Interval between repaints
    pub tick_rate: Duration,
    /// Capacity of the compute → host transport
    pub inbox_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick_rate: Duration::from_millis(16),
            inbox_capacity: MAX_MESSAGES,
        }
    }
}

/// Pending completion handles keyed by the reply they wait for
#[derive(Debug, Default)]
pub struct WaiterTable {
    waiters: HashMap<MessageKind, Sender<Message>>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the single waiter for `kind`.
    ///
    /// A live waiter of the same kind makes this a protocol violation; one
    /// whose receiver was dropped is replaced.
    pub fn register(&mut self, kind: MessageKind) -> WireResult<Receiver<Message>> {
        if let Some(existing) = self.waiters.get(&kind) {
            if !existing.is_closed() {
                let src = kind.to_string();
                let len = src.len();
                return Err(WireError::protocol(
                    src,
                    (0, len),
                    "a request of this kind is already waiting for its reply",
                )
                .into());
            }
        }
        let (tx, rx) = bounded(1);
        self.waiters.insert(kind, tx);
        Ok(rx)
    }

    /// Hands `message` to its waiter, or gives it back if nobody waits
    pub fn resolve(&mut self, message: Message) -> Result<(), Message> {
        match self.waiters.remove(&message.kind()) {
            Some(tx) => tx.try_send(message).map_err(|e| e.into_inner()),
            None => Err(message),
        }
    }

    pub fn is_waiting(&self, kind: MessageKind) -> bool {
        self.waiters.get(&kind).is_some_and(|tx| !tx.is_closed())
    }

    /// Drops the waiter for `kind`, if any
    pub fn cancel(&mut self, kind: MessageKind) {
        self.waiters.remove(&kind);
    }

    /// Drops every waiter; their receivers observe a closed channel
    pub fn cancel_all(&mut self) {
        self.waiters.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed(what: &str) -> miette::Report {
    WireError::channel_closed(what.to_string(), (0, 0)).into()
}

struct Shared {
    channel: StatusChannel,
    inbox: Inbox,
    outbound: Mutex<OutboundQueue>,
    /// Set while the pump owns an exchange, including buffer negotiation
    busy: AtomicBool,
    kick_tx: Sender<()>,
    kick_rx: Receiver<()>,
    clipboard_tx: Sender<()>,
    clipboard_rx: Receiver<()>,
    waiters: Mutex<WaiterTable>,
    screen: Mutex<Screen<Box<dyn Surface>>>,
    handlers: Mutex<Box<dyn HostHandlers>>,
    state: SessionState,
    compute: Mutex<Option<ComputeHandle>>,
    last_size: Mutex<Option<(u32, u32)>>,
    driving: AtomicBool,
    perf: AtomicBool,
    config: BridgeConfig,
}

/// Host-side proxy for one compute session. Cloning shares the session.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    /// Spawns the compute thread for `engine`. Nothing runs until
    /// [`start`](Self::start).
    pub fn new<E, S, H>(engine: E, surface: S, handlers: H, config: BridgeConfig) -> WireResult<Self>
    where
        E: Engine + 'static,
        S: Surface + 'static,
        H: HostHandlers + 'static,
    {
        let (outbox, inbox) = transport(config.inbox_capacity);
        let compute = spawn_compute(engine, outbox)?;
        let (kick_tx, kick_rx) = bounded(1);
        let (clipboard_tx, clipboard_rx) = unbounded();
        let surface: Box<dyn Surface> = Box::new(surface);
        let handlers: Box<dyn HostHandlers> = Box::new(handlers);

        Ok(Self {
            shared: Arc::new(Shared {
                channel: StatusChannel::new(),
                inbox,
                outbound: Mutex::new(OutboundQueue::new()),
                busy: AtomicBool::new(false),
                kick_tx,
                kick_rx,
                clipboard_tx,
                clipboard_rx,
                waiters: Mutex::new(WaiterTable::new()),
                screen: Mutex::new(Screen::new(surface)),
                handlers: Mutex::new(handlers),
                state: SessionState::default(),
                compute: Mutex::new(Some(compute)),
                last_size: Mutex::new(None),
                driving: AtomicBool::new(false),
                perf: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Sends the start message. The status channel in `options` is replaced
    /// by the bridge's own; a zero canvas size is taken from the surface.
    pub fn start(&self, mut options: StartOptions) -> WireResult<()> {
        options.buffer = self.shared.channel.clone();
        if options.canvas_dom_width == 0 && options.canvas_dom_height == 0 {
            let (width, height) = lock(&self.shared.screen).surface().current_size();
            options.canvas_dom_width = width;
            options.canvas_dom_height = height;
        }
        *lock(&self.shared.last_size) = Some((options.canvas_dom_width, options.canvas_dom_height));
        self.shared.state.set_clipboard_available(options.clipboard);
        self.shared.perf.store(options.perf, Ordering::Release);

        let compute = lock(&self.shared.compute);
        match compute.as_ref() {
            Some(handle) => handle.start(options),
            None => Err(closed("compute thread")),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.is_running()
    }

    /// Status channel shared with the compute thread
    pub fn channel(&self) -> &StatusChannel {
        &self.shared.channel
    }

    /// Events queued behind the one in flight
    pub fn pending_events(&self) -> usize {
        lock(&self.shared.outbound).len()
    }

    /// Runs `f` against the screen and its surface
    pub fn with_screen<R>(&self, f: impl FnOnce(&mut Screen<Box<dyn Surface>>) -> R) -> R {
        f(&mut lock(&self.shared.screen))
    }

    pub fn send_key(&self, key: KeyInput) -> WireResult<()> {
        self.check_inline(&key.key, KEY_HEADER_WORDS)?;
        self.submit(HostEvent::Key(key))
    }

    pub fn send_resize(&self, width: u32, height: u32) -> WireResult<()> {
        *lock(&self.shared.last_size) = Some((width, height));
        self.submit(HostEvent::Resize { width, height })
    }

    /// Sends a resize only if the surface size changed since the last one
    pub fn sync_surface_size(&self) -> WireResult<bool> {
        let size = lock(&self.shared.screen).surface().current_size();
        if *lock(&self.shared.last_size) == Some(size) {
            return Ok(false);
        }
        self.send_resize(size.0, size.1)?;
        Ok(true)
    }

    /// Runs a command line in the engine and reports whether it succeeded
    pub async fn request_cmdline(&self, cmdline: &str) -> WireResult<bool> {
        self.check_inline(cmdline, 0)?;
        let reply = lock(&self.shared.waiters).register(MessageKind::CmdlineResponse)?;
        self.submit(HostEvent::Cmdline(cmdline.to_string()))?;

        match reply.recv().await {
            Ok(Message::CmdlineResponse { success }) => Ok(success),
            Ok(other) => Err(unexpected(other.kind())),
            Err(_) => Err(closed("cmdline:response")),
        }
    }

    /// Delivers a file into the engine namespace at `/<name>`
    pub async fn drop_file(&self, name: &str, contents: Vec<u8>) -> WireResult<()> {
        self.check_inline(name, FILE_HEADER_WORDS)?;
        if i32::try_from(contents.len()).is_err() {
            return Err(WireError::resource(format!(
                "{} is too large to transfer ({} bytes)",
                name,
                contents.len()
            ))
            .into());
        }

        let (done, finished) = bounded(1);
        self.submit(HostEvent::DropFile {
            name: name.to_string(),
            contents,
            done,
        })?;
        finished
            .recv()
            .await
            .map_err(|_| closed("file transfer"))?
    }

    /// Drops several files, one after another, in iteration order
    pub async fn drop_files<I, N>(&self, files: I) -> WireResult<()>
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: AsRef<str>,
    {
        for (name, contents) in files {
            self.drop_file(name.as_ref(), contents).await?;
        }
        Ok(())
    }

    /// Reads the host clipboard through the configured handler
    pub async fn request_clipboard_text(&self) -> WireResult<String> {
        let pending = lock(&self.shared.handlers).read_clipboard();
        match pending {
            Some(read) => read.await,
            None => Err(WireError::resource("no clipboard access on this host").into()),
        }
    }

    /// Answers the engine's clipboard read with `text`
    pub async fn response_clipboard_text(&self, text: &str) -> WireResult<()> {
        let (done, finished) = bounded(1);
        self.submit(HostEvent::ClipboardText {
            text: text.to_string(),
            done,
        })?;
        finished
            .recv()
            .await
            .map_err(|_| closed("clipboard transfer"))?
    }

    /// Tells the engine the clipboard cannot be read
    pub fn notify_clipboard_error(&self) -> WireResult<()> {
        self.shared.state.set_clipboard_available(false);
        self.submit(HostEvent::ClipboardError)
    }

    /// Asks the engine to quit and resolves with its exit status
    pub async fn quit(&self) -> WireResult<i32> {
        let exit = lock(&self.shared.waiters).register(MessageKind::Exit)?;
        // Teardown cancels waiters; one registered after it would never resolve
        if !self.shared.state.is_running() {
            lock(&self.shared.waiters).cancel(MessageKind::Exit);
            return Err(closed("session ended"));
        }

        if let Err(err) = self.request_cmdline("qall!").await {
            // The engine may exit before it answers; teardown then cancels the reply
            if !matches!(wire_error(&err), Some(WireError::ChannelClosed { .. })) {
                lock(&self.shared.waiters).cancel(MessageKind::Exit);
                return Err(err);
            }
        }

        match exit.recv().await {
            Ok(Message::Exit { status }) => Ok(status),
            _ => Err(WireError::abnormal_exit("session ended without an exit message").into()),
        }
    }

    /// Drives the session until the engine exits.
    ///
    /// Returns the exit status, or the error that ended the session.
    pub async fn run(&self) -> WireResult<i32> {
        if self.shared.driving.swap(true, Ordering::AcqRel) {
            return Err(WireError::protocol("run", (0, 3), "the bridge is already being driven").into());
        }

        let result = future::or(
            self.dispatch_loop(),
            future::or(
                self.pump_loop(),
                future::or(self.clipboard_loop(), self.tick_loop()),
            ),
        )
        .await;

        self.teardown();
        if let Err(err) = &result {
            if !matches!(err.downcast_ref::<WireError>(), Some(WireError::Engine { .. })) {
                lock(&self.shared.handlers).on_error(err);
            }
        }
        result
    }

    fn check_inline(&self, text: &str, header_words: usize) -> WireResult<()> {
        // Status word and the string's length word are always needed
        let free = self
            .shared
            .channel
            .capacity()
            .saturating_sub(2 + header_words);
        let chars = text.chars().count();
        if chars <= free {
            return Ok(());
        }
        let start = text.char_indices().nth(free).map_or(text.len(), |(i, _)| i);
        Err(WireError::encoding(
            text.to_string(),
            (start, text.len() - start),
            format!("{} characters exceed the inline limit of {}", chars, free),
        )
        .into())
    }

    /// Writes `event` immediately when the channel is free and nothing is
    /// queued or in flight; queues it otherwise.
    fn submit(&self, event: HostEvent) -> WireResult<()> {
        if !self.shared.state.is_running() {
            return Err(closed("session ended"));
        }

        let mut outbound = lock(&self.shared.outbound);
        let free = outbound.is_empty()
            && !self.shared.busy.load(Ordering::Acquire)
            && self.shared.channel.is_idle();
        if free && !event.is_negotiated() {
            self.post_inline(&event)?;
            self.shared.state.mark_delivered();
            return Ok(());
        }

        outbound.push(event);
        drop(outbound);
        let _ = self.shared.kick_tx.try_send(());
        Ok(())
    }

    fn post_inline(&self, event: &HostEvent) -> WireResult<()> {
        let channel = &self.shared.channel;
        debug!(status = %event.status(), "posting event");
        match event {
            HostEvent::Key(key) => channel.post(StatusCode::NotifyKey, |w| key.write(w)),
            HostEvent::Resize { width, height } => {
                channel.post(StatusCode::NotifyResize, |w| write_resize(w, *width, *height))
            }
            HostEvent::Cmdline(cmdline) => {
                channel.post(StatusCode::RequestCmdline, |w| w.push_str(cmdline))
            }
            HostEvent::ClipboardError => channel.post(StatusCode::RequestClipboardBuf, |w| {
                w.push_bool(true)?;
                w.push_i32(0)
            }),
            HostEvent::DropFile { .. } | HostEvent::ClipboardText { .. } => {
                let src = event.status().to_string();
                let len = src.len();
                Err(WireError::protocol(src, (0, len), "negotiated event cannot be posted inline").into())
            }
        }
    }

    async fn deliver(&self, event: HostEvent) -> WireResult<()> {
        match event {
            HostEvent::DropFile {
                name,
                contents,
                done,
            } => {
                let result = self.deliver_file(&name, &contents).await;
                finish(&done, &result, "file transfer aborted");
                result
            }
            HostEvent::ClipboardText { text, done } => {
                let result = self.deliver_clipboard_text(text.as_bytes()).await;
                finish(&done, &result, "clipboard transfer aborted");
                result
            }
            inline => self.post_inline(&inline),
        }
    }

    /// Request a buffer sized for `contents`, fill it, then signal completion
    async fn deliver_file(&self, name: &str, contents: &[u8]) -> WireResult<()> {
        let reply = lock(&self.shared.waiters).register(MessageKind::OpenFileBufResponse)?;
        self.shared
            .channel
            .post(StatusCode::RequestOpenFileBuf, |w| {
                w.push_i32(contents.len() as i32)?;
                w.push_str(name)
            })?;

        let buffer = match reply.recv().await {
            Ok(Message::OpenFileBufResponse { buffer, .. }) => buffer,
            Ok(other) => return Err(unexpected(other.kind())),
            Err(_) => return Err(closed("open-file-buf:response")),
        };
        if buffer.len() != contents.len() {
            let src = format!("{} bytes requested, {} bytes granted", contents.len(), buffer.len());
            let len = src.len();
            return Err(WireError::protocol(src, (0, len), "negotiated buffer has the wrong size").into());
        }

        buffer.write(contents);
        self.shared.channel.wait_idle().await;
        self.shared
            .channel
            .post(StatusCode::NotifyOpenFileBufComplete, |_| Ok(()))?;
        debug!(%name, bytes = contents.len(), "file delivered");
        Ok(())
    }

    async fn deliver_clipboard_text(&self, bytes: &[u8]) -> WireResult<()> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| WireError::resource("clipboard text is too large to transfer"))?;
        let reply = lock(&self.shared.waiters).register(MessageKind::ClipboardBufResponse)?;
        self.shared
            .channel
            .post(StatusCode::RequestClipboardBuf, |w| {
                w.push_bool(false)?;
                w.push_i32(len)
            })?;

        let buffer = match reply.recv().await {
            Ok(Message::ClipboardBufResponse { buffer }) => buffer,
            Ok(other) => return Err(unexpected(other.kind())),
            Err(_) => return Err(closed("clipboard-buf:response")),
        };
        if buffer.len() < bytes.len() {
            let src = format!("{} bytes needed, {} bytes granted", bytes.len(), buffer.len());
            let len = src.len();
            return Err(WireError::protocol(src, (0, len), "clipboard buffer is too small").into());
        }

        buffer.write(bytes);
        self.shared.channel.wait_idle().await;
        self.shared
            .channel
            .post(StatusCode::NotifyClipboardWriteComplete, |_| Ok(()))
    }

    async fn dispatch_loop(&self) -> WireResult<i32> {
        loop {
            let Some(envelope) = self.shared.inbox.recv().await else {
                return Err(WireError::abnormal_exit(
                    "compute thread terminated without an exit message",
                )
                .into());
            };
            if let Some(status) = self.dispatch(envelope)? {
                return Ok(status);
            }
        }
    }

    /// Routes one inbound message; `Some` carries the exit status
    fn dispatch(&self, envelope: Envelope) -> WireResult<Option<i32>> {
        if self.shared.perf.load(Ordering::Acquire) {
            if let Some(latency) = envelope.latency_ms() {
                trace!(kind = %envelope.message.kind(), latency_ms = latency, "message latency");
            }
        }
        debug!(kind = %envelope.message.kind(), "received message");

        match envelope.message {
            Message::Draw(batch) => lock(&self.shared.screen).enqueue(batch),
            Message::Started => {
                self.shared.state.mark_started();
                lock(&self.shared.screen).surface_mut().on_started();
                lock(&self.shared.handlers).on_started();
            }
            Message::Exit { status } => {
                self.shared.state.mark_exited(status);
                let _ = lock(&self.shared.waiters).resolve(Message::Exit { status });
                lock(&self.shared.screen).surface_mut().on_exit(status);
                lock(&self.shared.handlers).on_exit(status);
                return Ok(Some(status));
            }
            Message::Error { message } => {
                let err: miette::Report = WireError::engine(message).into();
                error!("engine error: {}", err);
                self.shared.state.quit();
                lock(&self.shared.handlers).on_error(&err);
                return Err(err);
            }
            Message::Export { path, contents } => {
                lock(&self.shared.handlers).on_export(&path, &contents);
            }
            Message::ReadClipboardRequest => {
                let _ = self.shared.clipboard_tx.try_send(());
            }
            Message::WriteClipboard { text } => {
                lock(&self.shared.handlers).on_write_clipboard(&text);
            }
            reply @ (Message::OpenFileBufResponse { .. }
            | Message::ClipboardBufResponse { .. }
            | Message::CmdlineResponse { .. }) => {
                if let Err(orphan) = lock(&self.shared.waiters).resolve(reply) {
                    let err = unexpected(orphan.kind());
                    error!("{}", err);
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    async fn pump_loop(&self) -> WireResult<i32> {
        loop {
            let next = {
                let mut outbound = lock(&self.shared.outbound);
                let next = outbound.pop();
                self.shared.busy.store(next.is_some(), Ordering::Release);
                next
            };

            match next {
                Some(event) => {
                    self.shared.channel.wait_idle().await;
                    if let Err(err) = self.deliver(event).await {
                        error!("outbound delivery failed: {}", err);
                        return Err(err);
                    }
                    self.shared.state.mark_delivered();
                }
                None => {
                    if self.shared.kick_rx.recv().await.is_err() {
                        return Err(closed("outbound queue"));
                    }
                }
            }
        }
    }

    async fn clipboard_loop(&self) -> WireResult<i32> {
        loop {
            if self.shared.clipboard_rx.recv().await.is_err() {
                return Err(closed("clipboard requests"));
            }

            match self.request_clipboard_text().await {
                Ok(text) => self.response_clipboard_text(&text).await?,
                Err(err) => {
                    warn!("clipboard read failed, disabling clipboard: {}", err);
                    self.notify_clipboard_error()?;
                }
            }
        }
    }

    async fn tick_loop(&self) -> WireResult<i32> {
        loop {
            Timer::after(self.shared.config.tick_rate).await;
            lock(&self.shared.screen).tick();
        }
    }

    fn teardown(&self) {
        self.shared.state.quit();
        lock(&self.shared.outbound).abandon("session ended");
        lock(&self.shared.waiters).cancel_all();
        // Releases a compute thread still blocked waiting for an event
        self.shared.channel.close();
        self.shared.busy.store(false, Ordering::Release);
        self.shared.inbox.close();
        // Paint whatever the engine drew before it stopped
        lock(&self.shared.screen).tick();
        lock(&self.shared.compute).take();
    }
}

fn finish(done: &Sender<WireResult<()>>, result: &WireResult<()>, reason: &str) {
    let outcome = match result {
        Ok(()) => Ok(()),
        Err(_) => Err(closed(reason)),
    };
    let _ = done.try_send(outcome);
}

fn unexpected(kind: MessageKind) -> miette::Report {
    let src = kind.to_string();
    let len = src.len();
    WireError::protocol(src, (0, len), "reply arrived with no request waiting for it").into()
}
