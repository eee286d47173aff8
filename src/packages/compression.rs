// src/packages/compression.rs

//! Compression of the control and data members of a DEB archive

use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::str::FromStr;
use xz2::write::XzEncoder;

/// Compression format of the inner tar members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    Gzip,
    Xz,
    Zstd,
    /// Plain tar members
    None,
}

impl CompressionFormat {
    /// File name suffix appended to `control.tar` / `data.tar`
    pub fn suffix(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => ".gz",
            CompressionFormat::Xz => ".xz",
            CompressionFormat::Zstd => ".zst",
            CompressionFormat::None => "",
        }
    }

    /// Level used when none is given
    pub fn default_level(&self) -> u32 {
        match self {
            CompressionFormat::Gzip | CompressionFormat::Xz => 6,
            CompressionFormat::Zstd => 3,
            CompressionFormat::None => 0,
        }
    }
}

impl FromStr for CompressionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gz" | "gzip" => Ok(CompressionFormat::Gzip),
            "xz" => Ok(CompressionFormat::Xz),
            "zst" | "zstd" => Ok(CompressionFormat::Zstd),
            "none" => Ok(CompressionFormat::None),
            _ => Err(format!("Unsupported compression: {}", s)),
        }
    }
}

/// Format and level of member compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    pub format: CompressionFormat,
    pub level: u32,
}

impl Compression {
    pub fn new(format: CompressionFormat) -> Self {
        Self {
            format,
            level: format.default_level(),
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::new(CompressionFormat::default())
    }
}

/// Streaming encoder over any writer
pub enum Encoder<W: Write> {
    Gzip(GzEncoder<W>),
    Xz(XzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
    Plain(W),
}

impl<W: Write> Encoder<W> {
    /// Create an encoder; levels above the format's maximum are clamped
    pub fn new(inner: W, compression: Compression) -> io::Result<Self> {
        let encoder = match compression.format {
            CompressionFormat::Gzip => Encoder::Gzip(GzEncoder::new(
                inner,
                flate2::Compression::new(compression.level.min(9)),
            )),
            CompressionFormat::Xz => Encoder::Xz(XzEncoder::new(inner, compression.level.min(9))),
            CompressionFormat::Zstd => {
                let level = compression.level.clamp(1, 22) as i32;
                Encoder::Zstd(zstd::Encoder::new(inner, level)?)
            }
            CompressionFormat::None => Encoder::Plain(inner),
        };

        Ok(encoder)
    }

    /// Flush all compressed output and return the inner writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Gzip(inner) => inner.finish(),
            Encoder::Xz(inner) => inner.finish(),
            Encoder::Zstd(inner) => inner.finish(),
            Encoder::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(inner) => inner.write(buf),
            Encoder::Xz(inner) => inner.write(buf),
            Encoder::Zstd(inner) => inner.write(buf),
            Encoder::Plain(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(inner) => inner.flush(),
            Encoder::Xz(inner) => inner.flush(),
            Encoder::Zstd(inner) => inner.flush(),
            Encoder::Plain(inner) => inner.flush(),
        }
    }
}
