//! Firmware section wrapper.
//!
//! Compressed firmware sections use fixed settings (level 9, 273 fast bytes,
//! 8 MiB dictionary, no end marker) and carry a 13-byte header: the five
//! property bytes followed by the uncompressed size as a little-endian u64.
//!
//! Callers size the output with [`compressed_section_size`]; a short buffer
//! is rejected with [`LzError::BufferTooSmall`] before anything is encoded,
//! so the usual pattern is to query, allocate and call again.

use crate::encoder::encode_to_slice;
use crate::props::{EncoderProps, PROPS_SIZE};
use lzpack_core::error::{LzError, Result};
use lzpack_core::traits::NoProgress;

/// Bytes in front of the compressed stream.
pub const SECTION_HEADER_SIZE: usize = PROPS_SIZE + 8;

/// Dictionary size used for sections.
pub const SECTION_DICT_SIZE: u32 = 0x80_0000;

/// Encoder properties for firmware sections.
pub fn section_props() -> EncoderProps {
    EncoderProps::with_level(9)
        .dict_size(SECTION_DICT_SIZE)
        .fast_bytes(273)
        .end_marker(false)
}

/// Output buffer size required to compress `len` bytes as a section.
pub fn compressed_section_size(len: usize) -> usize {
    SECTION_HEADER_SIZE + len + len / 3 + 128
}

/// Compress `src` into `dest` as a firmware section and return the number
/// of bytes written, header included.
pub fn compress_section(src: &[u8], dest: &mut [u8]) -> Result<usize> {
    let needed = compressed_section_size(src.len());
    if dest.len() < needed {
        return Err(LzError::buffer_too_small(needed, dest.len()));
    }

    let (header, body) = dest.split_at_mut(SECTION_HEADER_SIZE);
    let (written, props) = encode_to_slice(body, src, &section_props(), &mut NoProgress)?;
    header[..PROPS_SIZE].copy_from_slice(&props);
    header[PROPS_SIZE..].copy_from_slice(&(src.len() as u64).to_le_bytes());
    Ok(SECTION_HEADER_SIZE + written)
}

/// Compress `src` as a firmware section into a new vector.
pub fn compress_section_to_vec(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; compressed_section_size(src.len())];
    let written = compress_section(src, &mut out)?;
    out.truncate(written);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_size() {
        assert_eq!(compressed_section_size(0), 141);
        assert_eq!(compressed_section_size(300), 13 + 300 + 100 + 128);
    }

    #[test]
    fn test_short_buffer_is_rejected_untouched() {
        let src = vec![0x5Au8; 1000];
        let mut dest = vec![0xEEu8; 100];
        let err = compress_section(&src, &mut dest).unwrap_err();
        assert_eq!(
            err,
            LzError::BufferTooSmall {
                needed: compressed_section_size(1000),
                available: 100,
            }
        );
        assert!(dest.iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_header_layout() {
        let src = b"firmware volume header firmware volume header".repeat(20);
        let out = compress_section_to_vec(&src).unwrap();
        assert_eq!(out[0], 93);
        assert_eq!(&out[1..5], &SECTION_DICT_SIZE.to_le_bytes());
        assert_eq!(&out[5..13], &(src.len() as u64).to_le_bytes());
        assert!(out.len() < src.len());
    }
}
