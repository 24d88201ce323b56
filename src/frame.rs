//! Canonical frames and the normalizer that produces them from raw loaded
//! pixel data.
//!
//! Orientation convention: row 0 of a [`Frame`] is the first row of a
//! single-plane image as stored on disk. Layered images (a trailing
//! channel axis) are stored bottom-up by the cameras that write them, so
//! the first layer is flipped vertically to match.

use crate::error::InputError;
use crate::regions::Region;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

/// A header value carried through to the output record untouched.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum CardValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Logical(bool),
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Integer(n) => write!(f, "{}", n),
            CardValue::Real(v) => write!(f, "{}", v),
            CardValue::Text(s) => f.write_str(s),
            CardValue::Logical(b) => f.write_str(if *b { "T" } else { "F" }),
        }
    }
}

/// Pixel layout of raw loaded data, derived from its row-major shape
/// (slowest axis first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    Planar { rows: usize, cols: usize },
    Layered { rows: usize, cols: usize, layers: usize },
}

impl FrameLayout {
    pub fn from_shape(shape: &[usize]) -> Result<Self, InputError> {
        if shape.iter().any(|&n| n == 0) {
            return Err(InputError::UnsupportedLayout {
                shape: shape.to_vec(),
            });
        }
        match *shape {
            [rows, cols] => Ok(FrameLayout::Planar { rows, cols }),
            [rows, cols, layers] => Ok(FrameLayout::Layered { rows, cols, layers }),
            _ => Err(InputError::UnsupportedLayout {
                shape: shape.to_vec(),
            }),
        }
    }

    fn pixel_count(&self) -> usize {
        match *self {
            FrameLayout::Planar { rows, cols } => rows * cols,
            FrameLayout::Layered { rows, cols, layers } => rows * cols * layers,
        }
    }
}

/// Pixel data and header cards as handed over by a loader.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Row-major shape, slowest axis first.
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    pub metadata: HashMap<String, CardValue>,
}

/// Canonical 2-D intensity array plus its metadata. Read-only once built.
#[derive(Debug, Clone)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<f64>,
    metadata: HashMap<String, CardValue>,
}

impl Frame {
    pub fn new(
        width: usize,
        height: usize,
        pixels: Vec<f64>,
        metadata: HashMap<String, CardValue>,
    ) -> Result<Self, InputError> {
        if pixels.len() != width * height {
            return Err(InputError::ShapeMismatch {
                shape: vec![height, width],
                expected: width * height,
                actual: pixels.len(),
            });
        }
        Ok(Frame {
            width,
            height,
            pixels,
            metadata,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    pub fn metadata(&self) -> &HashMap<String, CardValue> {
        &self.metadata
    }

    /// Look up a required metadata card.
    pub fn card(&self, key: &str) -> Result<&CardValue, InputError> {
        self.metadata
            .get(key)
            .ok_or_else(|| InputError::MissingCard(key.to_string()))
    }

    /// View of the pixels inside `region`. Bounds outside the frame are an
    /// error, never clamped.
    pub fn cutout(&self, region: &Region) -> Result<Cutout<'_>, InputError> {
        let x = region.x();
        let y = region.y();
        if x.end > self.width || y.end > self.height {
            return Err(InputError::RegionOutOfBounds {
                name: region.name().to_string(),
                x0: x.start,
                x1: x.end,
                y0: y.start,
                y1: y.end,
                width: self.width,
                height: self.height,
            });
        }
        Ok(Cutout { frame: self, x, y })
    }

    /// View covering the whole frame.
    pub fn full_view(&self) -> Cutout<'_> {
        Cutout {
            frame: self,
            x: 0..self.width,
            y: 0..self.height,
        }
    }
}

/// Non-owning rectangular view into a [`Frame`].
#[derive(Debug, Clone)]
pub struct Cutout<'a> {
    frame: &'a Frame,
    x: Range<usize>,
    y: Range<usize>,
}

impl<'a> Cutout<'a> {
    pub fn width(&self) -> usize {
        self.x.len()
    }

    pub fn height(&self) -> usize {
        self.y.len()
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Pixel at cutout-local column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.row(y)[x]
    }

    pub fn row(&self, y: usize) -> &'a [f64] {
        let start = (self.y.start + y) * self.frame.width + self.x.start;
        &self.frame.pixels[start..start + self.width()]
    }

    pub fn rows(&self) -> impl Iterator<Item = &'a [f64]> + '_ {
        (0..self.height()).map(move |y| self.row(y))
    }

    /// All pixels in row-major order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.rows().flat_map(|row| row.iter().copied())
    }
}

/// Turn raw loaded data into a canonical frame.
///
/// Planar data passes through unchanged. Layered data keeps only the first
/// layer and is flipped vertically.
pub fn normalize(raw: RawFrame) -> Result<Frame, InputError> {
    let layout = FrameLayout::from_shape(&raw.shape)?;
    if raw.data.len() != layout.pixel_count() {
        return Err(InputError::ShapeMismatch {
            expected: layout.pixel_count(),
            actual: raw.data.len(),
            shape: raw.shape,
        });
    }

    match layout {
        FrameLayout::Planar { rows, cols } => Frame::new(cols, rows, raw.data, raw.metadata),
        FrameLayout::Layered { rows, cols, layers } => {
            let mut pixels = Vec::with_capacity(rows * cols);
            for row in (0..rows).rev() {
                let base = row * cols * layers;
                pixels.extend((0..cols).map(|col| raw.data[base + col * layers]));
            }
            Frame::new(cols, rows, pixels, raw.metadata)
        }
    }
}
