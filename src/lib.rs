#![forbid(unsafe_code)]

//! # Oxiwire
//!
//! A synchronous event bridge between a blocking compute thread and an
//! async host.
//!
//! ## Overview
//!
//! Some engines are written around a blocking "wait for the next event"
//! call, while the host that feeds them input and shows their output must
//! never block. Oxiwire connects the two with a small set of primitives:
//!
//! - **Status channel**: a shared array of atomic words. Word 0 says which
//!   event is pending; the words after it carry the event's inline payload.
//!   The compute thread sleeps on it, the host writes and wakes.
//! - **Message transport**: an async channel for everything flowing back
//!   to the host, from draw batches to exit notifications.
//! - **Negotiated buffers**: payloads too large to inline (dropped files,
//!   clipboard text) travel through a shared byte buffer that the compute
//!   thread allocates on request.
//!
//! ## Core Components
//!
//! - [`Bridge`]: host-side proxy; queues events, resolves replies, paints
//! - [`Engine`]: the callbacks a blocking engine implements
//! - [`Context`]: the engine's view of the protocol (waits, draws, files)
//! - [`StatusChannel`]: atomic wait/notify over shared words
//! - [`Screen`]: coalesces draw batches into one repaint per tick
//! - [`CellSurface`]: a ratatui buffer that renders draw primitives
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use oxiwire::{
//!     Bridge, BridgeConfig, CellSurface, Context, DrawEvent, Engine, KeyInput, NoHandlers,
//!     StartOptions, WireResult,
//! };
//!
//! #[derive(Default)]
//! struct Echo {
//!     quit: bool,
//!     col: i32,
//! }
//!
//! impl Engine for Echo {
//!     fn run(&mut self, cx: &mut Context) -> WireResult<i32> {
//!         while !self.quit {
//!             cx.wait_for_event(self, None)?;
//!         }
//!         Ok(0)
//!     }
//!
//!     fn handle_key(&mut self, cx: &mut Context, key: &KeyInput) {
//!         cx.draw(DrawEvent::DrawText {
//!             text: key.key.clone(),
//!             char_height: 14,
//!             line_height: 16,
//!             char_width: 8,
//!             x: self.col * 8,
//!             y: 0,
//!             bold: false,
//!             underline: false,
//!             undercurl: false,
//!             strike: false,
//!         });
//!         self.col += 1;
//!     }
//!
//!     fn handle_resize(&mut self, _cx: &mut Context, _width: u32, _height: u32) {}
//!
//!     fn handle_drop(&mut self, _cx: &mut Context, _path: &str) {}
//!
//!     fn set_clipboard_available(&mut self, _available: bool) {}
//!
//!     fn run_command(&mut self, _cx: &mut Context, cmdline: &str) -> bool {
//!         self.quit = cmdline == "qall!";
//!         true
//!     }
//! }
//!
//! fn main() -> WireResult<()> {
//!     let bridge = Bridge::new(
//!         Echo::default(),
//!         CellSurface::new(80, 24),
//!         NoHandlers,
//!         BridgeConfig::default(),
//!     )?;
//!     bridge.start(StartOptions::default())?;
//!
//!     smol::block_on(async {
//!         let script = async {
//!             bridge.send_key(KeyInput::new("h", 72))?;
//!             bridge.send_key(KeyInput::new("i", 73))?;
//!             bridge.quit().await
//!         };
//!         let (status, _) = futures_lite::future::zip(bridge.run(), script).await;
//!         println!("engine exited with {}", status?);
//!         Ok(())
//!     })
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `status`: status codes and the atomic status channel
//! - `buffer`: negotiated shared byte buffers
//! - `message`: compute → host messages and their transport
//! - `event`: host → compute events and the outbound queue
//! - `draw`: draw primitives, batching and repaint coalescing
//! - `compute`: the blocking side of the protocol
//! - `host`: the non-blocking side of the protocol
//! - `state`: session lifecycle state
//! - `colors`: draw colour parsing and conversion
//! - `surface`: reference rendering surfaces
//! - `error`: error types and handling
//!
//! ## Error Handling
//!
//! The library uses [`WireResult`] and [`WireError`] for error handling with
//! detailed diagnostics via `miette`. Protocol violations are fatal and end
//! the session; resource failures such as an unreadable clipboard are
//! reported in-band and recovered from.

/// Re-exports of core components
pub use buffer::SharedBuffer;
pub use colors::Color;
pub use compute::{spawn_compute, ComputeHandle, ComputeRuntime, Context, Engine, FileNamespace, WaitReport};
pub use draw::{DrawBatcher, DrawEvent, Screen, Surface};
pub use error::{wire_error, WireError, WireResult};
pub use event::{HostEvent, KeyInput, Modifiers, OutboundQueue};
pub use host::{Bridge, BridgeConfig, HostHandlers, NoHandlers, WaiterTable};
pub use message::{transport, Envelope, Inbox, Message, MessageKind, Outbox, StartOptions};
pub use state::{SessionSnapshot, SessionState};
pub use status::{EventSlot, PayloadWriter, StatusChannel, StatusCode, WaitOutcome};
pub use surface::{CellSurface, TerminalSurface};

/// Negotiated shared byte buffers
pub mod buffer;
/// Draw colour parsing and conversion
pub mod colors;
/// The blocking compute side
pub mod compute;
/// Draw primitives and repaint coalescing
pub mod draw;
/// Error types and handling
pub mod error;
/// Host → compute events
pub mod event;
/// The non-blocking host side
pub mod host;
/// Compute → host messages
pub mod message;
/// Session lifecycle state
pub mod state;
/// Atomic status channel
pub mod status;
/// Reference rendering surfaces
pub mod surface;

#[cfg(test)]
mod testing;
