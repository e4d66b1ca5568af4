//! Dictionary-based sequence compression.
//!
//! Aligned sequences are stored per row as zstd frames compressed with the
//! reference genome as the dictionary: a stored sequence then costs roughly
//! its distance from the reference, which is what makes a horizontal store of
//! millions of near-identical genomes affordable.
//!
//! The contexts are cheap to create but not shareable across threads; each
//! partition task creates its own.

use std::io;

use zstd::bulk::{Compressor, Decompressor};

/// Compression level for sequence frames. Ratio barely improves past this
/// level for near-reference inputs while build time keeps growing.
const COMPRESSION_LEVEL: i32 = 2;

/// A per-row compressed string with its raw length, so decompression can size
/// its output buffer exactly.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompressedString {
    pub data: Vec<u8>,
    pub raw_len: u32,
}

/// Compresses sequences against a fixed dictionary (the reference genome).
pub struct DictCompressor {
    context: Compressor<'static>,
}

impl DictCompressor {
    pub fn new(dictionary: &[u8]) -> io::Result<Self> {
        Ok(DictCompressor {
            context: Compressor::with_dictionary(COMPRESSION_LEVEL, dictionary)?,
        })
    }

    pub fn compress(&mut self, input: &[u8]) -> io::Result<CompressedString> {
        Ok(CompressedString {
            data: self.context.compress(input)?,
            raw_len: input.len() as u32,
        })
    }
}

/// Decompresses sequences previously compressed against the same dictionary.
pub struct DictDecompressor {
    context: Decompressor<'static>,
}

impl DictDecompressor {
    pub fn new(dictionary: &[u8]) -> io::Result<Self> {
        Ok(DictDecompressor {
            context: Decompressor::with_dictionary(dictionary)?,
        })
    }

    pub fn decompress(&mut self, compressed: &CompressedString) -> io::Result<Vec<u8>> {
        self.context
            .decompress(&compressed.data, compressed.raw_len as usize)
    }

    /// Decompress to a UTF-8 string; sequence payloads are always ASCII.
    pub fn decompress_string(&mut self, compressed: &CompressedString) -> io::Result<String> {
        let bytes = self.decompress(compressed)?;
        String::from_utf8(bytes)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }
}
