//! Range encoder for LZMA compression.
//!
//! The range coder is an entropy coding method similar to arithmetic coding.
//! LZMA uses a specific variant with:
//! - 32-bit range tracking and a 33-bit `low` accumulator
//! - Normalization when range drops below 2^24
//! - 11-bit adaptive probabilities (1024 = 50%)
//!
//! Finished bytes are staged in a 64 KiB buffer and handed to the sink when it
//! fills. A failing sink is latched: later flushes are skipped and the failure
//! is reported at the next encoder checkpoint.

use crate::model::{MOVE_BITS, PROB_BITS, PROB_MAX};
use lzpack_core::error::{LzError, Result};
use lzpack_core::memory::try_with_capacity;
use std::io::Write;
use tracing::warn;

/// Top value for range normalization.
const TOP_VALUE: u32 = 1 << 24;

/// Size of the staging buffer.
pub const BUFFER_SIZE: usize = 1 << 16;

/// Destination of finished bytes.
enum Sink<'a> {
    Stream(Box<dyn Write + 'a>),
    Memory(Vec<u8>),
}

/// Range encoder for LZMA compression.
pub struct RangeEncoder<'a> {
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u64,
    buffer: Vec<u8>,
    processed: u64,
    sink: Sink<'a>,
    failure: Option<LzError>,
}

impl std::fmt::Debug for RangeEncoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeEncoder")
            .field("low", &self.low)
            .field("range", &self.range)
            .field("cache_size", &self.cache_size)
            .field("processed", &self.processed())
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl<'a> RangeEncoder<'a> {
    /// Create an encoder writing to `writer`.
    pub fn new(writer: impl Write + 'a) -> Result<Self> {
        Ok(Self {
            low: 0,
            range: 0xFFFF_FFFF,
            cache: 0,
            cache_size: 1,
            buffer: try_with_capacity(BUFFER_SIZE)?,
            processed: 0,
            sink: Sink::Stream(Box::new(writer)),
            failure: None,
        })
    }

    /// Reset the coder state for a new stream.
    pub fn reset(&mut self) {
        self.low = 0;
        self.range = 0xFFFF_FFFF;
        self.cache = 0;
        self.cache_size = 1;
        self.buffer.clear();
        self.processed = 0;
        self.failure = None;
    }

    /// Redirect output into an in-memory buffer, dropping the stream sink.
    pub fn use_memory_sink(&mut self) {
        if !matches!(self.sink, Sink::Memory(_)) {
            self.sink = Sink::Memory(Vec::new());
        }
    }

    /// Take the bytes collected by the memory sink.
    pub fn take_memory(&mut self) -> Vec<u8> {
        match &mut self.sink {
            Sink::Memory(data) => std::mem::take(data),
            Sink::Stream(_) => Vec::new(),
        }
    }

    /// Bytes produced so far, including bytes still pending in the cache.
    pub fn processed(&self) -> u64 {
        self.processed + self.buffer.len() as u64 + self.cache_size
    }

    /// Bytes handed to the sink or staged for it.
    pub fn emitted(&self) -> u64 {
        self.processed + self.buffer.len() as u64
    }

    /// The latched sink failure, if any.
    pub fn failure(&self) -> Option<&LzError> {
        self.failure.as_ref()
    }

    /// Hand the staged bytes to the sink.
    ///
    /// Once the sink has failed, staged bytes are discarded.
    pub fn flush_stream(&mut self) {
        let count = self.buffer.len();
        if self.failure.is_none() {
            let outcome = match &mut self.sink {
                Sink::Stream(writer) => writer.write_all(&self.buffer),
                Sink::Memory(data) => {
                    data.extend_from_slice(&self.buffer);
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                warn!(error = %err, "range coder sink failed");
                self.failure = Some(LzError::write_failed(err.to_string()));
            }
        }
        self.processed += count as u64;
        self.buffer.clear();
    }

    /// Flush the stream sink itself. Called once, after the last bytes.
    pub fn flush_sink(&mut self) {
        if self.failure.is_some() {
            return;
        }
        if let Sink::Stream(writer) = &mut self.sink {
            if let Err(err) = writer.flush() {
                warn!(error = %err, "range coder sink failed to flush");
                self.failure = Some(LzError::write_failed(err.to_string()));
            }
        }
    }

    /// Emit the top byte of `low`, resolving a pending carry.
    fn shift_low(&mut self) {
        if (self.low as u32) < 0xFF00_0000 || (self.low >> 32) != 0 {
            let carry = (self.low >> 32) as u8;
            let mut temp = self.cache;
            loop {
                self.buffer.push(temp.wrapping_add(carry));
                if self.buffer.len() == BUFFER_SIZE {
                    self.flush_stream();
                }
                temp = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = (self.low >> 24) as u8;
        }
        self.cache_size += 1;
        self.low = (self.low << 8) & 0xFFFF_FFFF;
    }

    /// Push out the remaining bytes of `low`.
    pub fn flush_data(&mut self) {
        for _ in 0..5 {
            self.shift_low();
        }
    }

    /// Encode a single bit with the given probability.
    #[inline]
    pub fn encode_bit(&mut self, prob: &mut u16, bit: u32) {
        let p = u32::from(*prob);
        let bound = (self.range >> PROB_BITS) * p;
        if bit == 0 {
            self.range = bound;
            *prob = (p + ((PROB_MAX - p) >> MOVE_BITS)) as u16;
        } else {
            self.low += u64::from(bound);
            self.range -= bound;
            *prob = (p - (p >> MOVE_BITS)) as u16;
        }
        if self.range < TOP_VALUE {
            self.range <<= 8;
            self.shift_low();
        }
    }

    /// Encode the low `count` bits of `value` with fixed 50% probability.
    pub fn encode_direct_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.range >>= 1;
            if (value >> i) & 1 != 0 {
                self.low += u64::from(self.range);
            }
            if self.range < TOP_VALUE {
                self.range <<= 8;
                self.shift_low();
            }
        }
    }

    /// Encode a bit tree (normal order).
    pub fn encode_tree(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in (0..num_bits).rev() {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Encode a bit tree (reverse order).
    pub fn encode_reverse_tree(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        let mut symbol = symbol;
        for _ in 0..num_bits {
            let bit = symbol & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
            symbol >>= 1;
        }
    }

    /// Encode a literal with the plain literal coder.
    pub fn encode_literal(&mut self, probs: &mut [u16], symbol: u8) {
        let mut symbol = u32::from(symbol) | 0x100;
        while symbol < 0x10000 {
            self.encode_bit(&mut probs[(symbol >> 8) as usize], (symbol >> 7) & 1);
            symbol <<= 1;
        }
    }

    /// Encode a literal against the byte at rep0.
    ///
    /// While the coded bits agree with `match_byte` the probabilities are
    /// taken from the matched half of the coder; after the first mismatch
    /// the plain half is used.
    pub fn encode_matched_literal(&mut self, probs: &mut [u16], symbol: u8, match_byte: u8) {
        let mut offs = 0x100u32;
        let mut symbol = u32::from(symbol) | 0x100;
        let mut match_byte = u32::from(match_byte);
        while symbol < 0x10000 {
            match_byte <<= 1;
            let index = offs + (match_byte & offs) + (symbol >> 8);
            self.encode_bit(&mut probs[index as usize], (symbol >> 7) & 1);
            symbol <<= 1;
            offs &= !(match_byte ^ symbol);
        }
    }
}
