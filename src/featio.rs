//! Feature-file reading and writing.
//!
//! The estimation core consumes feature vectors through the
//! [`FeatureSource`] trait and stays agnostic to the on-disk
//! representation. [`FeatureCodec`] implements the trait for the three
//! formats the toolchain exchanges: whitespace-delimited text, HTK binary
//! and Sphinx binary. Binary payloads are little-endian `f32`, so binary
//! round trips preserve values to `f32` precision; text round trips are
//! exact for `f64`.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::errors::{io_error, CompensationError, CompensationResult};

/// Frame period written into HTK headers (100 ns units, 10 ms frames).
pub const HTK_FRAME_PERIOD: i32 = 100_000;

/// Sample-kind code written into HTK headers (MFCC with C0).
pub const HTK_SAMPLE_KIND: i16 = 8198;

/// Default cepstral coefficient count for Sphinx files.
pub const SPHINX_COEFFICIENTS: usize = 13;

/// Reads and writes ordered sequences of fixed-dimension feature vectors.
///
/// Implementations must preserve frame count, order and numeric values
/// (within the format's floating-point precision) across a write/read
/// round trip.
pub trait FeatureSource {
    /// Reads all frames of one feature file, in order.
    fn read_frames(&self, path: &Path) -> CompensationResult<Vec<Vec<f64>>>;

    /// Writes a frame sequence to one feature file.
    fn write_frames(&self, path: &Path, frames: &[Vec<f64>]) -> CompensationResult<()>;
}

/// On-disk feature-file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureCodec {
    /// One frame per line, ASCII floats separated by whitespace. Blank
    /// and whitespace-only lines are skipped.
    Text,
    /// HTK binary: little-endian header {frame count: i32, frame period:
    /// i32, bytes per frame: i16, sample kind: i16} followed by an `f32`
    /// payload.
    Htk,
    /// Sphinx binary: little-endian i32 total value count followed by an
    /// `f32` payload of `coefficients`-wide frames.
    Sphinx {
        /// Fixed frame width of the file.
        coefficients: usize,
    },
}

impl FeatureCodec {
    /// Sphinx codec with the conventional 13-coefficient frames.
    pub fn sphinx() -> Self {
        Self::Sphinx {
            coefficients: SPHINX_COEFFICIENTS,
        }
    }
}

impl FeatureSource for FeatureCodec {
    fn read_frames(&self, path: &Path) -> CompensationResult<Vec<Vec<f64>>> {
        match self {
            Self::Text => read_text(path),
            Self::Htk => read_htk(path),
            Self::Sphinx { coefficients } => read_sphinx(path, *coefficients),
        }
    }

    fn write_frames(&self, path: &Path, frames: &[Vec<f64>]) -> CompensationResult<()> {
        match self {
            Self::Text => write_text(path, frames),
            Self::Htk => write_htk(path, frames),
            Self::Sphinx { coefficients } => write_sphinx(path, frames, *coefficients),
        }
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> CompensationError {
    CompensationError::MalformedFeatureFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Checks that every frame has the same width and returns it (0 for an
/// empty sequence).
fn uniform_width(frames: &[Vec<f64>], context: &str) -> CompensationResult<usize> {
    let width = frames.first().map_or(0, Vec::len);
    for frame in frames {
        if frame.len() != width {
            return Err(CompensationError::DimensionMismatch {
                expected: width,
                actual: frame.len(),
                context: context.to_string(),
            });
        }
    }
    Ok(width)
}

fn read_text(path: &Path) -> CompensationResult<Vec<Vec<f64>>> {
    let content = fs::read_to_string(path).map_err(|e| io_error("reading", path, e))?;
    let mut frames: Vec<Vec<f64>> = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut frame = Vec::new();
        for token in line.split_whitespace() {
            let value: f64 = token.parse().map_err(|_| {
                malformed(path, format!("unparseable value {token:?} on line {}", index + 1))
            })?;
            frame.push(value);
        }
        if let Some(first) = frames.first() {
            if frame.len() != first.len() {
                return Err(CompensationError::DimensionMismatch {
                    expected: first.len(),
                    actual: frame.len(),
                    context: format!("line {} of {}", index + 1, path.display()),
                });
            }
        }
        frames.push(frame);
    }
    Ok(frames)
}

fn write_text(path: &Path, frames: &[Vec<f64>]) -> CompensationResult<()> {
    uniform_width(frames, "text feature write")?;
    let mut out = String::new();
    for frame in frames {
        let mut first = true;
        for value in frame {
            if !first {
                out.push(' ');
            }
            first = false;
            // Display round-trips f64 exactly
            out.push_str(&value.to_string());
        }
        out.push('\n');
    }
    fs::write(path, out).map_err(|e| io_error("writing", path, e))
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(raw)
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&bytes[offset..offset + 2]);
    i16::from_le_bytes(raw)
}

/// Decodes a little-endian f32 payload into `count` frames of `width`.
fn decode_payload(
    path: &Path,
    payload: &[u8],
    count: usize,
    width: usize,
) -> CompensationResult<Vec<Vec<f64>>> {
    if payload.len() != count * width * 4 {
        return Err(malformed(
            path,
            format!(
                "payload holds {} bytes, header promises {} frames of width {}",
                payload.len(),
                count,
                width
            ),
        ));
    }
    let mut frames = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let mut frame = Vec::with_capacity(width);
        for _ in 0..width {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&payload[offset..offset + 4]);
            frame.push(f64::from(f32::from_le_bytes(raw)));
            offset += 4;
        }
        frames.push(frame);
    }
    Ok(frames)
}

fn encode_payload(frames: &[Vec<f64>]) -> Vec<u8> {
    let width = frames.first().map_or(0, Vec::len);
    let mut payload = Vec::with_capacity(frames.len() * width * 4);
    for frame in frames {
        for &value in frame {
            payload.extend_from_slice(&(value as f32).to_le_bytes());
        }
    }
    payload
}

const HTK_HEADER_LEN: usize = 12;

fn read_htk(path: &Path) -> CompensationResult<Vec<Vec<f64>>> {
    let bytes = fs::read(path).map_err(|e| io_error("reading", path, e))?;
    if bytes.len() < HTK_HEADER_LEN {
        return Err(malformed(path, "truncated HTK header"));
    }
    let frame_count = read_i32(&bytes, 0);
    let _frame_period = read_i32(&bytes, 4);
    let bytes_per_frame = read_i16(&bytes, 8);
    let _sample_kind = read_i16(&bytes, 10);

    if frame_count < 0 {
        return Err(malformed(path, format!("negative frame count {frame_count}")));
    }
    if frame_count == 0 {
        return Ok(Vec::new());
    }
    if bytes_per_frame <= 0 || bytes_per_frame % 4 != 0 {
        return Err(malformed(
            path,
            format!("bytes per frame {bytes_per_frame} is not a positive multiple of 4"),
        ));
    }
    decode_payload(
        path,
        &bytes[HTK_HEADER_LEN..],
        frame_count as usize,
        bytes_per_frame as usize / 4,
    )
}

fn write_htk(path: &Path, frames: &[Vec<f64>]) -> CompensationResult<()> {
    let width = uniform_width(frames, "HTK feature write")?;
    let bytes_per_frame = width * 4;
    if bytes_per_frame > i16::MAX as usize {
        return Err(CompensationError::InvalidParameter {
            parameter: "frame width".to_string(),
            value: width.to_string(),
            constraint: format!("at most {} values per HTK frame", i16::MAX / 4),
        });
    }
    let mut out = fs::File::create(path).map_err(|e| io_error("creating", path, e))?;
    let mut buffer = Vec::with_capacity(HTK_HEADER_LEN + frames.len() * bytes_per_frame);
    buffer.extend_from_slice(&(frames.len() as i32).to_le_bytes());
    buffer.extend_from_slice(&HTK_FRAME_PERIOD.to_le_bytes());
    buffer.extend_from_slice(&(bytes_per_frame as i16).to_le_bytes());
    buffer.extend_from_slice(&HTK_SAMPLE_KIND.to_le_bytes());
    buffer.extend_from_slice(&encode_payload(frames));
    out.write_all(&buffer).map_err(|e| io_error("writing", path, e))
}

const SPHINX_HEADER_LEN: usize = 4;

fn read_sphinx(path: &Path, coefficients: usize) -> CompensationResult<Vec<Vec<f64>>> {
    crate::errors::validate_nonzero(coefficients, "coefficients")?;
    let bytes = fs::read(path).map_err(|e| io_error("reading", path, e))?;
    if bytes.len() < SPHINX_HEADER_LEN {
        return Err(malformed(path, "truncated Sphinx header"));
    }
    let total = read_i32(&bytes, 0);
    if total < 0 {
        return Err(malformed(path, format!("negative value count {total}")));
    }
    let total = total as usize;
    if total % coefficients != 0 {
        return Err(malformed(
            path,
            format!("value count {total} is not a multiple of frame width {coefficients}"),
        ));
    }
    decode_payload(
        path,
        &bytes[SPHINX_HEADER_LEN..],
        total / coefficients,
        coefficients,
    )
}

fn write_sphinx(path: &Path, frames: &[Vec<f64>], coefficients: usize) -> CompensationResult<()> {
    crate::errors::validate_nonzero(coefficients, "coefficients")?;
    let width = uniform_width(frames, "Sphinx feature write")?;
    if !frames.is_empty() && width != coefficients {
        return Err(CompensationError::DimensionMismatch {
            expected: coefficients,
            actual: width,
            context: "Sphinx feature write".to_string(),
        });
    }
    let mut buffer = Vec::with_capacity(SPHINX_HEADER_LEN + frames.len() * width * 4);
    buffer.extend_from_slice(&((frames.len() * coefficients) as i32).to_le_bytes());
    buffer.extend_from_slice(&encode_payload(frames));
    fs::write(path, buffer).map_err(|e| io_error("writing", path, e))
}
