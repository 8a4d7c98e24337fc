//! Scripted engine, recording surface and handlers shared by the tests

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_lite::future::Boxed;

use crate::{
    compute::{Context, Engine},
    draw::{DrawEvent, Surface},
    error::{WireError, WireResult},
    error::wire_error,
    event::KeyInput,
    host::HostHandlers,
    message::Message,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Key(KeyInput),
    Resize(u32, u32),
    Drop(String),
    ClipboardAvailable(bool),
    ClipboardQuery(bool),
    Clipboard(Option<String>),
    Command(String),
    Viewport(u32, u32),
    File(String, Option<Vec<u8>>),
    Args(Vec<String>),
}

/// Records every callback and understands a handful of commands:
/// `qall!`, `size`, `draw`, `paste`, `clipboard?`, `export <path>`,
/// `copy <text>`, `cat <path>`, `fail` and `crash`.
#[derive(Debug)]
pub(crate) struct ScriptedEngine {
    calls: Arc<Mutex<Vec<Call>>>,
    exit: Option<i32>,
    crash: Option<String>,
    exit_immediately: bool,
    idle: Duration,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            exit: None,
            crash: None,
            exit_immediately: false,
            idle: Duration::from_millis(50),
        }
    }

    pub(crate) fn exiting_immediately() -> Self {
        Self {
            exit_immediately: true,
            ..Self::new()
        }
    }

    pub(crate) fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        self.calls.clone()
    }

    pub(crate) fn recorded(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Engine for ScriptedEngine {
    fn run(&mut self, cx: &mut Context) -> WireResult<i32> {
        if !cx.cmd_args().is_empty() {
            self.record(Call::Args(cx.cmd_args().to_vec()));
        }
        if self.exit_immediately {
            return Ok(0);
        }
        loop {
            if let Some(msg) = self.crash.take() {
                return Err(WireError::engine(msg).into());
            }
            if let Some(status) = self.exit {
                return Ok(status);
            }
            let idle = self.idle;
            cx.wait_for_event(self, Some(idle))?;
        }
    }

    fn handle_key(&mut self, cx: &mut Context, key: &KeyInput) {
        self.record(Call::Key(key.clone()));
        cx.draw(DrawEvent::DrawText {
            text: key.key.clone(),
            char_height: 14,
            line_height: 16,
            char_width: 8,
            x: 0,
            y: 0,
            bold: false,
            underline: false,
            undercurl: false,
            strike: false,
        });
    }

    fn handle_resize(&mut self, _cx: &mut Context, width: u32, height: u32) {
        self.record(Call::Resize(width, height));
    }

    fn handle_drop(&mut self, _cx: &mut Context, path: &str) {
        self.record(Call::Drop(path.to_string()));
    }

    fn set_clipboard_available(&mut self, available: bool) {
        self.record(Call::ClipboardAvailable(available));
    }

    fn run_command(&mut self, cx: &mut Context, cmdline: &str) -> bool {
        self.record(Call::Command(cmdline.to_string()));
        let (cmd, arg) = cmdline.split_once(' ').unwrap_or((cmdline, ""));
        match cmd {
            "qall!" => {
                self.exit = Some(0);
                true
            }
            "size" => {
                let (w, h) = cx.viewport();
                self.record(Call::Viewport(w, h));
                true
            }
            "draw" => {
                cx.draw(DrawEvent::SetFont {
                    name: "monospace".into(),
                    size: 12,
                });
                cx.draw(DrawEvent::DrawText {
                    text: "hi".into(),
                    char_height: 14,
                    line_height: 16,
                    char_width: 8,
                    x: 0,
                    y: 0,
                    bold: true,
                    underline: false,
                    undercurl: false,
                    strike: false,
                });
                cx.draw(DrawEvent::DrawRect {
                    x: 16,
                    y: 0,
                    w: 8,
                    h: 16,
                    color: "#ffffff".into(),
                    filled: true,
                });
                true
            }
            "paste" => {
                let text = cx.read_clipboard(self).ok().flatten();
                let ok = text.is_some();
                self.record(Call::Clipboard(text));
                ok
            }
            "clipboard?" => {
                self.record(Call::ClipboardQuery(cx.clipboard_available()));
                true
            }
            "export" => cx.export_file(arg).unwrap_or(false),
            "copy" => cx.write_clipboard(arg).is_ok(),
            "cat" => {
                let contents = cx.files().read(arg).map(<[u8]>::to_vec);
                let found = contents.is_some();
                self.record(Call::File(arg.to_string(), contents));
                found
            }
            "fail" => false,
            "crash" => {
                self.crash = Some("E999: engine crashed".to_string());
                true
            }
            _ => true,
        }
    }
}

/// Engine whose main loop dies without reporting anything
#[derive(Debug)]
pub(crate) struct PanickingEngine;

impl Engine for PanickingEngine {
    fn run(&mut self, _cx: &mut Context) -> WireResult<i32> {
        panic!("engine vanished");
    }

    fn handle_key(&mut self, _cx: &mut Context, _key: &KeyInput) {}

    fn handle_resize(&mut self, _cx: &mut Context, _width: u32, _height: u32) {}

    fn handle_drop(&mut self, _cx: &mut Context, _path: &str) {}

    fn set_clipboard_available(&mut self, _available: bool) {}

    fn run_command(&mut self, _cx: &mut Context, _cmdline: &str) -> bool {
        false
    }
}

/// Engine that answers a request nobody made, then waits without a timeout
/// until the channel gives out. Records whether it was released by a close.
#[derive(Debug, Default)]
pub(crate) struct StrayReplyEngine {
    released: Arc<Mutex<Option<bool>>>,
}

impl StrayReplyEngine {
    pub(crate) fn released(&self) -> Arc<Mutex<Option<bool>>> {
        self.released.clone()
    }
}

impl Engine for StrayReplyEngine {
    fn run(&mut self, cx: &mut Context) -> WireResult<i32> {
        cx.send(Message::CmdlineResponse { success: true })?;
        loop {
            if let Err(err) = cx.wait_for_event(self, None) {
                let closed = matches!(wire_error(&err), Some(WireError::ChannelClosed { .. }));
                *self.released.lock().unwrap() = Some(closed);
                return Err(err);
            }
        }
    }

    fn handle_key(&mut self, _cx: &mut Context, _key: &KeyInput) {}

    fn handle_resize(&mut self, _cx: &mut Context, _width: u32, _height: u32) {}

    fn handle_drop(&mut self, _cx: &mut Context, _path: &str) {}

    fn set_clipboard_available(&mut self, _available: bool) {}

    fn run_command(&mut self, _cx: &mut Context, _cmdline: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostCall {
    Started,
    Exit(i32),
    Error(String),
    Export(String, Vec<u8>),
    ReadClipboard,
    WriteClipboard(String),
}

/// Records every handler callback; serves `clipboard` when set
#[derive(Debug, Default)]
pub(crate) struct RecordingHandlers {
    calls: Arc<Mutex<Vec<HostCall>>>,
    clipboard: Option<String>,
}

impl RecordingHandlers {
    pub(crate) fn with_clipboard(text: &str) -> Self {
        Self {
            clipboard: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Arc<Mutex<Vec<HostCall>>> {
        self.calls.clone()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl HostHandlers for RecordingHandlers {
    fn on_started(&mut self) {
        self.record(HostCall::Started);
    }

    fn on_exit(&mut self, status: i32) {
        self.record(HostCall::Exit(status));
    }

    fn on_error(&mut self, err: &miette::Report) {
        self.record(HostCall::Error(err.to_string()));
    }

    fn on_export(&mut self, path: &str, contents: &[u8]) {
        self.record(HostCall::Export(path.to_string(), contents.to_vec()));
    }

    fn read_clipboard(&mut self) -> Option<Boxed<WireResult<String>>> {
        self.record(HostCall::ReadClipboard);
        let text = self.clipboard.clone()?;
        Some(Box::pin(async move { Ok::<_, miette::Report>(text) }))
    }

    fn on_write_clipboard(&mut self, text: &str) {
        self.record(HostCall::WriteClipboard(text.to_string()));
    }
}

#[derive(Debug, Default)]
struct Painted {
    methods: Vec<&'static str>,
    font_changes: usize,
    presents: usize,
    lifecycle: Vec<HostCall>,
}

/// Surface that remembers what was applied to it. Clones share the record.
#[derive(Debug, Clone)]
pub(crate) struct RecordingSurface {
    painted: Arc<Mutex<Painted>>,
    size: (u32, u32),
}

impl RecordingSurface {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            painted: Arc::default(),
            size: (width, height),
        }
    }

    pub(crate) fn methods(&self) -> Vec<&'static str> {
        self.painted.lock().unwrap().methods.clone()
    }

    pub(crate) fn font_changes(&self) -> usize {
        self.painted.lock().unwrap().font_changes
    }

    pub(crate) fn presents(&self) -> usize {
        self.painted.lock().unwrap().presents
    }

    pub(crate) fn lifecycle(&self) -> Vec<HostCall> {
        self.painted.lock().unwrap().lifecycle.clone()
    }
}

impl Surface for RecordingSurface {
    fn draw(&mut self, event: &DrawEvent) {
        self.painted.lock().unwrap().methods.push(event.method());
    }

    fn present(&mut self) {
        self.painted.lock().unwrap().presents += 1;
    }

    fn on_message(&mut self, event: &DrawEvent) {
        if matches!(event, DrawEvent::SetFont { .. }) {
            self.painted.lock().unwrap().font_changes += 1;
        }
    }

    fn on_started(&mut self) {
        self.painted.lock().unwrap().lifecycle.push(HostCall::Started);
    }

    fn on_exit(&mut self, status: i32) {
        self.painted.lock().unwrap().lifecycle.push(HostCall::Exit(status));
    }

    fn current_size(&self) -> (u32, u32) {
        self.size
    }
}
