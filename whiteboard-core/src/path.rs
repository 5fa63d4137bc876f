//! Drawn strokes.
//!
//! A [`Path`] is produced by whatever surface captures pen input and is
//! immutable once recorded. The core only stores, orders and transmits it.
//!
//! Wire form: `#rrggbb,width,x y;x y;...`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::{WireError, COORD_SEPARATOR, FIELD_SEPARATOR, POINT_SEPARATOR};

/// 2D point in board (pixel) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Opaque RGB stroke color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0 };

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .filter(|h| h.len() == 6 && h.is_ascii())
            .ok_or_else(|| WireError::malformed(format!("color must be #rrggbb, got {s:?}")))?;
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| WireError::malformed(format!("invalid color {s:?}")))
        };
        Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

/// A single stroke: color, width and the ordered points it passes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    pub color: Color,
    pub width: u32,
    pub points: Vec<Point>,
}

impl Path {
    pub fn new(color: Color, width: u32, points: Vec<Point>) -> Self {
        Self {
            color,
            width,
            points,
        }
    }

    /// Encode to the canonical wire form.
    pub fn encode(&self) -> String {
        let points = self
            .points
            .iter()
            .map(|p| format!("{}{COORD_SEPARATOR}{}", p.x, p.y))
            .collect::<Vec<_>>()
            .join(POINT_SEPARATOR);
        format!(
            "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{points}",
            self.color, self.width
        )
    }

    /// Decode from the canonical wire form.
    pub fn decode(s: &str) -> Result<Self, WireError> {
        let fields: Vec<&str> = s.split(FIELD_SEPARATOR).collect();
        let [color, width, points] = fields.as_slice() else {
            return Err(WireError::malformed(format!(
                "path needs 3 fields, got {}: {s:?}",
                fields.len()
            )));
        };

        let color = color.parse::<Color>()?;
        let width = width
            .parse::<u32>()
            .map_err(|_| WireError::malformed(format!("invalid stroke width {width:?}")))?;

        let points = if points.is_empty() {
            Vec::new()
        } else {
            points
                .split(POINT_SEPARATOR)
                .map(decode_point)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self::new(color, width, points))
    }
}

fn decode_point(s: &str) -> Result<Point, WireError> {
    let (x, y) = s
        .split_once(COORD_SEPARATOR)
        .ok_or_else(|| WireError::malformed(format!("point must be \"x y\", got {s:?}")))?;
    let coord = |v: &str| {
        v.parse::<i32>()
            .map_err(|_| WireError::malformed(format!("invalid coordinate in {s:?}")))
    };
    Ok(Point::new(coord(x)?, coord(y)?))
}
