//! Content-coding registry.
//!
//! Every [`EncodingType`] knows its HTTP token and how to encode or decode a
//! byte slice into a sink. Compression parameters are fixed so that encoding
//! the same input twice yields the same bytes.

use std::fmt;
use std::io::{self, Write};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use thiserror::Error;

const FLATE_LEVEL: u32 = 6;
const BROTLI_QUALITY: i32 = 5;
const BROTLI_WINDOW: i32 = 22;
const ZSTD_LEVEL: i32 = 3;

/// A content coding as named by `Content-Encoding` / `Accept-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EncodingType {
    Identity,
    Brotli,
    Deflate,
    GZip,
    Zstandard,
    /// LZW `compress`; recognised in headers but never produced or consumed.
    Compress,
    Unsupported,
}

/// Codings this crate can both encode and decode.
pub const SUPPORTED_ENCODINGS: [EncodingType; 5] = [
    EncodingType::Identity,
    EncodingType::Brotli,
    EncodingType::Deflate,
    EncodingType::GZip,
    EncodingType::Zstandard,
];

/// Order in which stored bodies are tried as the source of a re-encode.
pub const REENCODE_PRIORITY: [EncodingType; 5] = [
    EncodingType::Identity,
    EncodingType::Zstandard,
    EncodingType::GZip,
    EncodingType::Deflate,
    EncodingType::Brotli,
];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("content coding `{0}` is not supported")]
    Unsupported(EncodingType),
    #[error("{coding} codec failed: {source}")]
    Io {
        coding: EncodingType,
        #[source]
        source: io::Error,
    },
}

impl CodecError {
    fn io(coding: EncodingType, source: io::Error) -> Self {
        Self::Io { coding, source }
    }
}

impl EncodingType {
    /// Map an `Accept-Encoding` / `Content-Encoding` token to a coding.
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.eq_ignore_ascii_case("identity") {
            Self::Identity
        } else if token.eq_ignore_ascii_case("br") {
            Self::Brotli
        } else if token.eq_ignore_ascii_case("deflate") {
            Self::Deflate
        } else if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            Self::GZip
        } else if token.eq_ignore_ascii_case("zstd") {
            Self::Zstandard
        } else if token.eq_ignore_ascii_case("compress")
            || token.eq_ignore_ascii_case("x-compress")
        {
            Self::Compress
        } else {
            Self::Unsupported
        }
    }

    /// The canonical header token, if the coding has one.
    pub fn header_name(self) -> Option<&'static str> {
        match self {
            Self::Identity => Some("identity"),
            Self::Brotli => Some("br"),
            Self::Deflate => Some("deflate"),
            Self::GZip => Some("gzip"),
            Self::Zstandard => Some("zstd"),
            Self::Compress => Some("compress"),
            Self::Unsupported => None,
        }
    }

    /// True for codings that can actually be produced.
    pub fn is_real(self) -> bool {
        !matches!(self, Self::Compress | Self::Unsupported)
    }

    /// Encode `input` into `sink`.
    pub fn encode<W: Write>(self, input: &[u8], sink: &mut W) -> Result<(), CodecError> {
        match self {
            Self::Identity => sink.write_all(input).map_err(|err| CodecError::io(self, err)),
            Self::GZip => {
                let mut encoder = GzEncoder::new(sink, Compression::new(FLATE_LEVEL));
                encoder
                    .write_all(input)
                    .map_err(|err| CodecError::io(self, err))?;
                encoder
                    .finish()
                    .map(drop)
                    .map_err(|err| CodecError::io(self, err))
            }
            Self::Deflate => {
                let mut encoder = ZlibEncoder::new(sink, Compression::new(FLATE_LEVEL));
                encoder
                    .write_all(input)
                    .map_err(|err| CodecError::io(self, err))?;
                encoder
                    .finish()
                    .map(drop)
                    .map_err(|err| CodecError::io(self, err))
            }
            Self::Brotli => {
                let params = brotli::enc::BrotliEncoderParams {
                    quality: BROTLI_QUALITY,
                    lgwin: BROTLI_WINDOW,
                    ..Default::default()
                };
                let mut reader = input;
                brotli::BrotliCompress(&mut reader, sink, &params)
                    .map(drop)
                    .map_err(|err| CodecError::io(self, err))
            }
            Self::Zstandard => zstd::stream::copy_encode(input, sink, ZSTD_LEVEL)
                .map_err(|err| CodecError::io(self, err)),
            Self::Compress | Self::Unsupported => Err(CodecError::Unsupported(self)),
        }
    }

    /// Decode `input` into `sink`.
    pub fn decode<W: Write>(self, input: &[u8], sink: &mut W) -> Result<(), CodecError> {
        match self {
            Self::Identity => sink.write_all(input).map_err(|err| CodecError::io(self, err)),
            Self::GZip => io::copy(&mut GzDecoder::new(input), sink)
                .map(drop)
                .map_err(|err| CodecError::io(self, err)),
            Self::Deflate => io::copy(&mut ZlibDecoder::new(input), sink)
                .map(drop)
                .map_err(|err| CodecError::io(self, err)),
            Self::Brotli => {
                let mut reader = input;
                brotli::BrotliDecompress(&mut reader, sink).map_err(|err| CodecError::io(self, err))
            }
            Self::Zstandard => {
                zstd::stream::copy_decode(input, sink).map_err(|err| CodecError::io(self, err))
            }
            Self::Compress | Self::Unsupported => Err(CodecError::Unsupported(self)),
        }
    }

    pub fn encode_to_vec(self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(input.len() / 2);
        self.encode(input, &mut out)?;
        Ok(out)
    }

    pub fn decode_to_vec(self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(input.len().saturating_mul(2));
        self.decode(input, &mut out)?;
        Ok(out)
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_name().unwrap_or("unsupported"))
    }
}

/// Convert a body stored as `from` into `to`.
pub(crate) fn transcode(
    from: EncodingType,
    to: EncodingType,
    input: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if from == to {
        return Ok(input.to_vec());
    }
    if from == EncodingType::Identity {
        return to.encode_to_vec(input);
    }
    let plain = from.decode_to_vec(input)?;
    if to == EncodingType::Identity {
        return Ok(plain);
    }
    to.encode_to_vec(&plain)
}
