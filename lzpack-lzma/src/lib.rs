//! # lzpack LZMA
//!
//! LZMA (Lempel-Ziv-Markov chain Algorithm) encoder.
//!
//! The encoder produces raw LZMA streams as used in 7-Zip, `.lzma` files and
//! compressed firmware sections. It pairs a dictionary match finder with a
//! price-driven optimal parser, and codes the chosen literals and matches
//! with an adaptive binary range coder.
//!
//! ## Features
//!
//! - **Pure Rust**, single-threaded, no unsafe code
//! - Binary tree (BT2/BT3/BT4) and hash chain (HC4) match finders
//! - Optimal and fast parsing
//! - Streaming from any [`std::io::Read`] into any [`std::io::Write`]
//! - Bounded one-shot encoding into a caller buffer
//! - Block-streaming chunks with state save and restore
//! - Firmware section framing ([`section`])
//!
//! ## Usage
//!
//! ```rust
//! use lzpack_lzma::{EncoderProps, compress_to_vec};
//!
//! let data = b"Hello, World! Hello, World! Hello, World!";
//! let props = EncoderProps::with_level(5).dict_size(1 << 16);
//! let (stream, header) = compress_to_vec(data, &props)?;
//! assert_eq!(header[0], 93);
//! assert!(!stream.is_empty());
//! # Ok::<(), lzpack_core::LzError>(())
//! ```
//!
//! ## Stream format
//!
//! The 5-byte properties header is returned separately:
//! 1. Properties byte `(pb * 5 + lp) * 9 + lc`
//! 2. Dictionary size (4 bytes, little-endian, rounded to `2^n` or `3 * 2^n`)
//!
//! The raw stream follows; it ends with an end marker only when requested.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoder;
pub mod match_finder;
pub mod model;
pub mod optimal;
pub mod price;
pub mod props;
pub mod range_coder;
pub mod section;
pub mod window;

// Re-exports
pub use encoder::{ChunkOutput, LzmaEncoder, compress_to_vec, encode_to_slice};
pub use match_finder::{FinderConfig, MatchFinder, MatchPair};
pub use optimal::Decision;
pub use props::{
    Algorithm, EncoderConfig, EncoderProps, MatchFinderKind, PROPS_SIZE, rounded_dict_size,
};
pub use range_coder::RangeEncoder;
pub use section::{compress_section, compress_section_to_vec, compressed_section_size};
