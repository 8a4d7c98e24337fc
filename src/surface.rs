//! Reference rendering surfaces.
//!
//! The engine draws in pixels on a canvas. [`CellSurface`] maps those pixels
//! onto a grid of terminal cells held in a ratatui [`Buffer`], using the cell
//! metrics carried by each `drawText` primitive. [`TerminalSurface`] puts
//! that grid on a real terminal through crossterm.

use std::io::{self, IsTerminal, Stdout};

use crossterm::{
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    buffer::{Buffer, Cell},
    layout::Rect,
    style::{Color as RatatuiColor, Modifier},
    widgets::Widget,
    Terminal,
};
use tracing::warn;

use crate::{
    colors::Color,
    draw::{DrawEvent, Surface},
    error::{WireError, WireResult},
};

/// Pixel size of one cell until the engine reports its own
pub const DEFAULT_CELL: (u32, u32) = (8, 16);

/// Canvas coordinates left of or above the origin clamp to it
fn px(v: i32) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

/// A surface that rasterises draw primitives into terminal cells
#[derive(Debug, Clone)]
pub struct CellSurface {
    buffer: Buffer,
    cell: (u32, u32),
    fg: Color,
    bg: Color,
    sp: Color,
    font: Option<(String, u32)>,
    presents: u64,
}

impl CellSurface {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            buffer: Buffer::empty(Rect::new(0, 0, cols, rows)),
            cell: DEFAULT_CELL,
            fg: Color::WHITE,
            bg: Color::BLACK,
            sp: Color::WHITE,
            font: None,
            presents: 0,
        }
    }

    pub fn with_cell_size(mut self, width: u32, height: u32) -> Self {
        self.set_cell_size(width, height);
        self
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Pixel size of one cell
    pub fn cell_size(&self) -> (u32, u32) {
        self.cell
    }

    /// Font from the last `setFont`, if any
    pub fn font(&self) -> Option<(&str, u32)> {
        self.font.as_ref().map(|(name, size)| (name.as_str(), *size))
    }

    pub fn special_color(&self) -> Color {
        self.sp
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    /// Resizes the grid, keeping what fits
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.buffer.resize(Rect::new(0, 0, cols, rows));
    }

    /// Symbols of one row, trailing blanks trimmed
    pub fn row_text(&self, row: u16) -> String {
        let area = self.buffer.area;
        if row >= area.height {
            return String::new();
        }
        let line: String = (0..area.width)
            .map(|col| self.buffer[(col, row)].symbol())
            .collect();
        line.trim_end().to_string()
    }

    /// Renders the grid as ANSI-coloured lines
    pub fn to_ansi(&self) -> String {
        let area = self.buffer.area;
        let mut out = String::new();
        for row in 0..area.height {
            for col in 0..area.width {
                let cell = &self.buffer[(col, row)];
                let fg = Color::from_ratatui(cell.fg).unwrap_or(self.fg);
                let bg = Color::from_ratatui(cell.bg).unwrap_or(self.bg);
                out.push_str(&fg.paint(bg, cell.symbol()));
            }
            out.push('\n');
        }
        out
    }

    fn set_cell_size(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.cell = (width, height);
        }
    }

    /// Cells covered by a pixel rectangle, clipped to the grid
    fn cells(&self, x: u32, y: u32, w: u32, h: u32) -> Rect {
        let (cw, ch) = self.cell;
        let col = x / cw;
        let row = y / ch;
        let cols = x.saturating_add(w).div_ceil(cw).saturating_sub(col);
        let rows = y.saturating_add(h).div_ceil(ch).saturating_sub(row);
        let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        Rect::new(clamp(col), clamp(row), clamp(cols), clamp(rows)).intersection(self.buffer.area)
    }

    fn draw_text(&mut self, text: &str, x: u32, y: u32, modifier: Modifier) {
        let area = self.cells(x, y, 1, 1);
        if area.is_empty() {
            return;
        }
        let (fg, bg) = (self.fg.to_ratatui(), self.bg.to_ratatui());
        let mut col = area.x;
        for ch in text.chars() {
            if col >= self.buffer.area.right() {
                break;
            }
            let cell = &mut self.buffer[(col, area.y)];
            cell.set_char(ch).set_fg(fg).set_bg(bg);
            cell.modifier = modifier;
            col += 1;
        }
    }

    fn draw_rect(&mut self, area: Rect, color: RatatuiColor, filled: bool) {
        for row in area.top()..area.bottom() {
            for col in area.left()..area.right() {
                let edge = row == area.top()
                    || row + 1 == area.bottom()
                    || col == area.left()
                    || col + 1 == area.right();
                if filled {
                    self.buffer[(col, row)].set_char(' ').set_bg(color);
                } else if edge {
                    self.buffer[(col, row)].set_fg(color);
                }
            }
        }
    }

    fn invert(&mut self, area: Rect) {
        for row in area.top()..area.bottom() {
            for col in area.left()..area.right() {
                let cell = &mut self.buffer[(col, row)];
                let (fg, bg) = (cell.fg, cell.bg);
                cell.set_fg(bg).set_bg(fg);
            }
        }
    }

    /// Moves `rows` rows of the column span from `src` to `dst`
    fn scroll(&mut self, span: Rect, src: u16, dst: u16, rows: u16) {
        let rows = rows
            .min(self.buffer.area.height.saturating_sub(src))
            .min(self.buffer.area.height.saturating_sub(dst));
        let copy_row = |buffer: &mut Buffer, offset: u16| {
            for col in span.left()..span.right() {
                let cell: Cell = buffer[(col, src + offset)].clone();
                buffer[(col, dst + offset)] = cell;
            }
        };
        // Copy away from the overlap so no source row is clobbered first
        if dst < src {
            (0..rows).for_each(|offset| copy_row(&mut self.buffer, offset));
        } else {
            (0..rows).rev().for_each(|offset| copy_row(&mut self.buffer, offset));
        }
    }
}

impl Surface for CellSurface {
    fn draw(&mut self, event: &DrawEvent) {
        match event {
            DrawEvent::SetColorFg(c) => self.fg = Color::from_hex(c).unwrap_or(self.fg),
            DrawEvent::SetColorBg(c) => self.bg = Color::from_hex(c).unwrap_or(self.bg),
            DrawEvent::SetColorSp(c) => self.sp = Color::from_hex(c).unwrap_or(self.sp),
            DrawEvent::SetFont { name, size } => self.font = Some((name.clone(), *size)),
            DrawEvent::DrawRect {
                x,
                y,
                w,
                h,
                color,
                filled,
            } => {
                let color = Color::from_hex(color).unwrap_or(self.bg).to_ratatui();
                let area = self.cells(px(*x), px(*y), px(*w), px(*h));
                self.draw_rect(area, color, *filled);
            }
            DrawEvent::DrawText {
                text,
                line_height,
                char_width,
                x,
                y,
                bold,
                underline,
                undercurl,
                strike,
                ..
            } => {
                self.set_cell_size(px(*char_width), px(*line_height));
                let mut modifier = Modifier::empty();
                if *bold {
                    modifier |= Modifier::BOLD;
                }
                if *underline || *undercurl {
                    modifier |= Modifier::UNDERLINED;
                }
                if *strike {
                    modifier |= Modifier::CROSSED_OUT;
                }
                self.draw_text(text, px(*x), px(*y), modifier);
            }
            DrawEvent::InvertRect { x, y, w, h } => {
                let area = self.cells(px(*x), px(*y), px(*w), px(*h));
                self.invert(area);
            }
            DrawEvent::ImageScroll { x, sy, dy, w, h } => {
                let (_, ch) = self.cell;
                let span = self.cells(px(*x), 0, px(*w), 1);
                let to_row = |v: i32| u16::try_from(px(v) / ch).unwrap_or(u16::MAX);
                self.scroll(span, to_row(*sy), to_row(*dy), to_row(*h));
            }
        }
    }

    fn present(&mut self) {
        self.presents += 1;
    }

    fn current_size(&self) -> (u32, u32) {
        let area = self.buffer.area;
        (
            u32::from(area.width) * self.cell.0,
            u32::from(area.height) * self.cell.1,
        )
    }
}

/// Copies the grid into a frame, clipped to `area`
impl Widget for &CellSurface {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let area = area.intersection(buf.area);
        for row in 0..area.height.min(self.buffer.area.height) {
            for col in 0..area.width.min(self.buffer.area.width) {
                buf[(area.x + col, area.y + row)] = self.buffer[(col, row)].clone();
            }
        }
    }
}

/// A [`CellSurface`] shown on the process's terminal
pub struct TerminalSurface {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    cells: CellSurface,
}

impl TerminalSurface {
    /// Enters raw mode on the alternate screen, sized to the terminal
    pub fn new() -> WireResult<Self> {
        if !io::stdout().is_terminal() || std::env::var("TERM").is_ok_and(|t| t == "dumb") {
            return Err(WireError::resource("stdout is not a capable terminal").into());
        }

        execute!(io::stdout(), EnterAlternateScreen)
            .map_err(|e| WireError::resource(format!("failed to enter alternate screen: {}", e)))?;
        terminal::enable_raw_mode()
            .map_err(|e| WireError::resource(format!("failed to enable raw mode: {}", e)))?;

        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
            .map_err(|e| WireError::resource(format!("failed to create terminal: {}", e)))?;
        let (cols, rows) = terminal::size()
            .map_err(|e| WireError::resource(format!("failed to query terminal size: {}", e)))?;

        Ok(Self {
            terminal,
            cells: CellSurface::new(cols, rows),
        })
    }

    pub fn cells(&self) -> &CellSurface {
        &self.cells
    }

    /// Follows the terminal's size; call before [`Bridge::sync_surface_size`]
    ///
    /// [`Bridge::sync_surface_size`]: crate::host::Bridge::sync_surface_size
    pub fn refresh_size(&mut self) -> WireResult<()> {
        let (cols, rows) = terminal::size()
            .map_err(|e| WireError::resource(format!("failed to query terminal size: {}", e)))?;
        self.cells.resize(cols, rows);
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        terminal::disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()
    }
}

impl Surface for TerminalSurface {
    fn draw(&mut self, event: &DrawEvent) {
        self.cells.draw(event);
    }

    fn present(&mut self) {
        self.cells.present();
        let cells = &self.cells;
        if let Err(e) = self.terminal.draw(|frame| frame.render_widget(cells, frame.area())) {
            warn!("failed to present frame: {}", e);
        }
    }

    fn on_message(&mut self, event: &DrawEvent) {
        self.cells.on_message(event);
    }

    fn current_size(&self) -> (u32, u32) {
        self.cells.current_size()
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            eprintln!("Error restoring terminal: {}", e);
        }
    }
}
