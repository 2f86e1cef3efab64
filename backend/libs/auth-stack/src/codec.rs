//! Codec registry
//!
//! Decompression algorithms keyed by the `cmp` short code. The registry is
//! populated once at startup and then shared read-only (`Arc<CodecRegistry>`)
//! across concurrent walks. A tag's meaning can never change after it is
//! registered: tokens already in flight reference tags indefinitely.

use crate::claim::Compression;
use crate::error::CodecError;
use brotli::{CompressorWriter, Decompressor};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 9;
const BROTLI_WINDOW: u32 = 20;

/// A reversible compression algorithm
///
/// `decompress` must stop at `limit` output bytes: container contents are
/// attacker-reachable and a tiny input can expand without bound.
pub trait Codec: Send + Sync {
    fn compress(&self, input: &[u8]) -> std::io::Result<Vec<u8>>;

    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError>;
}

/// Read a decoder to the end, refusing to produce more than `limit` bytes
fn read_bounded<R: Read>(reader: R, tag: &str, limit: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    reader
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|source| CodecError::Io {
            tag: tag.to_string(),
            source,
        })?;

    if out.len() > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(out)
}

/// `none`: bytes pass through unchanged
pub struct Identity;

impl Codec for Identity {
    fn compress(&self, input: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        if input.len() > limit {
            return Err(CodecError::TooLarge { limit });
        }
        Ok(input.to_vec())
    }
}

/// `gz`: gzip (RFC 1952)
pub struct Gzip;

impl Codec for Gzip {
    fn compress(&self, input: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(input)?;
        encoder.finish()
    }

    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        read_bounded(GzDecoder::new(input), Compression::GZIP_TAG, limit)
    }
}

/// `br`: Brotli
pub struct Brotli;

impl Codec for Brotli {
    fn compress(&self, input: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut compressed = Vec::new();
        {
            let mut writer = CompressorWriter::new(
                &mut compressed,
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY,
                BROTLI_WINDOW,
            );
            writer.write_all(input)?;
            writer.flush()?;
        }
        Ok(compressed)
    }

    fn decompress(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        read_bounded(
            Decompressor::new(input, BROTLI_BUFFER_SIZE),
            Compression::BROTLI_TAG,
            limit,
        )
    }
}

/// Codecs by tag
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Registry with no codecs, not even identity
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registry with the built-in `none`, `gz` and `br` codecs
    pub fn with_builtins() -> Self {
        let mut codecs: HashMap<String, Arc<dyn Codec>> = HashMap::new();
        codecs.insert(Compression::NONE_TAG.to_string(), Arc::new(Identity));
        codecs.insert(Compression::GZIP_TAG.to_string(), Arc::new(Gzip));
        codecs.insert(Compression::BROTLI_TAG.to_string(), Arc::new(Brotli));
        Self { codecs }
    }

    /// Add a codec under a new tag
    ///
    /// Registering an existing tag is refused, never overwritten.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        codec: impl Codec + 'static,
    ) -> Result<(), CodecError> {
        let tag = tag.into();
        if self.codecs.contains_key(&tag) {
            return Err(CodecError::AlreadyRegistered(tag));
        }
        self.codecs.insert(tag, Arc::new(codec));
        Ok(())
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.codecs.contains_key(tag)
    }

    pub fn compress(&self, tag: &str, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.lookup(tag)?
            .compress(input)
            .map_err(|source| CodecError::Io {
                tag: tag.to_string(),
                source,
            })
    }

    pub fn decompress(&self, tag: &str, input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
        self.lookup(tag)?.decompress(input, limit)
    }

    fn lookup(&self, tag: &str) -> Result<&Arc<dyn Codec>, CodecError> {
        self.codecs
            .get(tag)
            .ok_or_else(|| CodecError::Unsupported(tag.to_string()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("CodecRegistry").field("tags", &tags).finish()
    }
}
