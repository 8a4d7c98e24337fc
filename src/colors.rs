//! Colours carried by draw primitives.
//!
//! The engine names colours as `#rrggbb` strings (occasionally `#rgb` or
//! with a trailing alpha byte). This module parses them once on the host and
//! converts them for ratatui buffers and owo-colors output.

use owo_colors::OwoColorize;
use ratatui::style::Color as RatatuiColor;
use std::fmt::{self, Display};

/// A draw colour, parsed from its hex string form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[inline]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parses `#rgb`, `#rrggbb` or `#rrggbbaa`; the leading `#` is optional
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();

        match hex.len() {
            3 => {
                let mut nibbles = hex.chars().map(|c| c.to_digit(16).map(|d| (d * 17) as u8));
                let r = nibbles.next()??;
                let g = nibbles.next()??;
                let b = nibbles.next()??;
                Some(Self::rgb(r, g, b))
            }
            6 => Some(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    /// Canonical `#rrggbb` form, with alpha appended only when not opaque
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    /// Inverts the color, keeping alpha
    pub fn invert(&self) -> Self {
        Self::rgba(255 - self.r, 255 - self.g, 255 - self.b, self.a)
    }

    pub fn to_owo_rgb(&self) -> owo_colors::Rgb {
        owo_colors::Rgb(self.r, self.g, self.b)
    }

    /// Alpha is dropped; terminal cells are opaque
    pub fn to_ratatui(&self) -> RatatuiColor {
        RatatuiColor::Rgb(self.r, self.g, self.b)
    }

    /// Reads a ratatui colour back; only RGB colours are understood
    pub fn from_ratatui(color: RatatuiColor) -> Option<Self> {
        match color {
            RatatuiColor::Rgb(r, g, b) => Some(Self::rgb(r, g, b)),
            RatatuiColor::Black => Some(Self::BLACK),
            RatatuiColor::White => Some(Self::WHITE),
            _ => None,
        }
    }

    pub fn rgb_components(&self) -> (u8, u8, u8) {
        (self.r, self.g, self.b)
    }

    /// Paints `text` with this colour as foreground on `bg`
    pub fn paint(&self, bg: Color, text: &str) -> String {
        text.color(self.to_owo_rgb())
            .on_color(bg.to_owo_rgb())
            .to_string()
    }
}

impl From<Color> for owo_colors::Rgb {
    fn from(color: Color) -> Self {
        color.to_owo_rgb()
    }
}

impl From<Color> for RatatuiColor {
    fn from(color: Color) -> Self {
        color.to_ratatui()
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
