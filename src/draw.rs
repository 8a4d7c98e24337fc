//! Draw primitives, compute-side batching and host-side repaint coalescing.
//!
//! The engine emits primitives synchronously while it handles an event. The
//! [`DrawBatcher`] collects them and the compute loop ships the whole batch
//! as one message. On the host, [`Screen`] applies batches strictly in
//! arrival order but presents at most once per tick.

use std::collections::VecDeque;

/// A single draw primitive emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawEvent {
    SetColorFg(String),
    SetColorBg(String),
    SetColorSp(String),
    SetFont {
        name: String,
        size: u32,
    },
    DrawRect {
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        color: String,
        filled: bool,
    },
    DrawText {
        text: String,
        char_height: i32,
        line_height: i32,
        char_width: i32,
        x: i32,
        y: i32,
        bold: bool,
        underline: bool,
        undercurl: bool,
        strike: bool,
    },
    InvertRect {
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    },
    /// Moves the band `[sy, sy + h)` to start at `dy`
    ImageScroll {
        x: i32,
        sy: i32,
        dy: i32,
        w: i32,
        h: i32,
    },
}

impl DrawEvent {
    /// Wire name of the primitive
    pub const fn method(&self) -> &'static str {
        match self {
            Self::SetColorFg(_) => "setColorFG",
            Self::SetColorBg(_) => "setColorBG",
            Self::SetColorSp(_) => "setColorSP",
            Self::SetFont { .. } => "setFont",
            Self::DrawRect { .. } => "drawRect",
            Self::DrawText { .. } => "drawText",
            Self::InvertRect { .. } => "invertRect",
            Self::ImageScroll { .. } => "imageScroll",
        }
    }
}

/// Accumulates primitives on the compute thread between flushes
#[derive(Debug, Default)]
pub struct DrawBatcher {
    pending: Vec<DrawEvent>,
    flushed: u64,
}

impl DrawBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, event: DrawEvent) {
        self.pending.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Takes the pending batch, or `None` when nothing was drawn
    pub fn take(&mut self) -> Option<Vec<DrawEvent>> {
        if self.pending.is_empty() {
            return None;
        }
        self.flushed += 1;
        Some(std::mem::take(&mut self.pending))
    }

    /// Batches handed out so far
    pub fn batches_flushed(&self) -> u64 {
        self.flushed
    }
}

/// Host-side rendering target for draw primitives
pub trait Surface: Send {
    /// Applies one primitive to the backing store
    fn draw(&mut self, event: &DrawEvent);

    /// Makes everything drawn since the last call visible
    fn present(&mut self) {}

    /// Called as each batch arrives, before painting is deferred.
    ///
    /// Side effects that must not wait for the next tick (font of the input
    /// element, focus, cursor visibility) belong here.
    fn on_message(&mut self, _event: &DrawEvent) {}

    /// The engine finished initialising
    fn on_started(&mut self) {}

    /// The engine exited; no further batches will arrive
    fn on_exit(&mut self, _status: i32) {}

    /// Current size of the drawable area in pixels
    fn current_size(&self) -> (u32, u32);
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn draw(&mut self, event: &DrawEvent) {
        (**self).draw(event);
    }

    fn present(&mut self) {
        (**self).present();
    }

    fn on_message(&mut self, event: &DrawEvent) {
        (**self).on_message(event);
    }

    fn on_started(&mut self) {
        (**self).on_started();
    }

    fn on_exit(&mut self, status: i32) {
        (**self).on_exit(status);
    }

    fn current_size(&self) -> (u32, u32) {
        (**self).current_size()
    }
}

/// Ordered draw queue with one repaint per tick
#[derive(Debug)]
pub struct Screen<S> {
    surface: S,
    queue: VecDeque<DrawEvent>,
    repaint_scheduled: bool,
    repaints: u64,
}

impl<S: Surface> Screen<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            queue: VecDeque::new(),
            repaint_scheduled: false,
            repaints: 0,
        }
    }

    /// Queues a batch behind everything already queued
    pub fn enqueue(&mut self, batch: Vec<DrawEvent>) {
        for event in &batch {
            self.surface.on_message(event);
        }
        self.queue.extend(batch);
        self.repaint_scheduled = !self.queue.is_empty();
    }

    /// Applies all queued primitives in order and presents once.
    ///
    /// Returns the number of primitives applied.
    pub fn tick(&mut self) -> usize {
        if !self.repaint_scheduled {
            return 0;
        }
        self.repaint_scheduled = false;

        let applied = self.queue.len();
        while let Some(event) = self.queue.pop_front() {
            self.surface.draw(&event);
        }
        self.surface.present();
        self.repaints += 1;
        applied
    }

    pub fn is_repaint_scheduled(&self) -> bool {
        self.repaint_scheduled
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn repaints(&self) -> u64 {
        self.repaints
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default)]
    struct Recording {
        drawn: Vec<&'static str>,
        immediate: Vec<&'static str>,
        presents: usize,
    }

    impl Surface for Recording {
        fn draw(&mut self, event: &DrawEvent) {
            self.drawn.push(event.method());
        }

        fn present(&mut self) {
            self.presents += 1;
        }

        fn on_message(&mut self, event: &DrawEvent) {
            if let DrawEvent::SetFont { .. } = event {
                self.immediate.push(event.method());
            }
        }

        fn current_size(&self) -> (u32, u32) {
            (800, 600)
        }
    }

    fn font() -> DrawEvent {
        DrawEvent::SetFont {
            name: "monospace".into(),
            size: 12,
        }
    }

    fn text(s: &str) -> DrawEvent {
        DrawEvent::DrawText {
            text: s.into(),
            char_height: 14,
            line_height: 16,
            char_width: 8,
            x: 0,
            y: 0,
            bold: false,
            underline: false,
            undercurl: false,
            strike: false,
        }
    }

    fn rect() -> DrawEvent {
        DrawEvent::DrawRect {
            x: 0,
            y: 0,
            w: 8,
            h: 16,
            color: "#000000".into(),
            filled: true,
        }
    }

    #[test]
    fn test_batcher_flushes_in_emission_order() {
        let mut batcher = DrawBatcher::new();
        assert!(batcher.take().is_none());

        batcher.push(font());
        batcher.push(text("hi"));
        batcher.push(rect());
        assert_eq!(batcher.len(), 3);

        let batch = batcher.take().unwrap();
        let methods: Vec<_> = batch.iter().map(DrawEvent::method).collect();
        assert_eq!(methods, vec!["setFont", "drawText", "drawRect"]);
        assert!(batcher.is_empty());
        assert_eq!(batcher.batches_flushed(), 1);
    }

    #[test]
    fn test_batches_coalesce_into_one_repaint() {
        let mut screen = Screen::new(Recording::default());
        screen.enqueue(vec![font(), text("a"), rect()]);
        screen.enqueue(vec![text("b")]);

        // Immediate effects ran before any paint
        assert_eq!(screen.surface().immediate, vec!["setFont"]);
        assert!(screen.surface().drawn.is_empty());
        assert!(screen.is_repaint_scheduled());

        assert_eq!(screen.tick(), 4);
        assert_eq!(
            screen.surface().drawn,
            vec!["setFont", "drawText", "drawRect", "drawText"]
        );
        assert_eq!(screen.surface().presents, 1);

        // Nothing new, nothing presented
        assert_eq!(screen.tick(), 0);
        assert_eq!(screen.repaints(), 1);
    }

    #[test]
    fn test_later_batch_never_overtakes_earlier() {
        let mut screen = Screen::new(Recording::default());
        screen.enqueue(vec![font(), text("first"), rect()]);
        screen.enqueue(vec![rect(), font()]);
        screen.tick();
        assert_eq!(
            screen.surface().drawn,
            vec!["setFont", "drawText", "drawRect", "drawRect", "setFont"]
        );
    }

    #[test]
    fn test_boxed_surface() {
        let mut screen: Screen<Box<dyn Surface>> = Screen::new(Box::new(Recording::default()));
        screen.enqueue(vec![rect()]);
        assert_eq!(screen.pending(), 1);
        assert_eq!(screen.tick(), 1);
        assert_eq!(screen.surface().current_size(), (800, 600));
    }
}
