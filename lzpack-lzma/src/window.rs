//! Sliding input window.
//!
//! The window owns one arena holding the dictionary history behind the
//! current position and the look-ahead in front of it. Input is pulled from
//! the reader in large blocks; when the look-ahead runs short near the end of
//! the arena, the live region is moved back to the start.
//!
//! Positions are 32-bit counters that start at the cyclic buffer size, so a
//! hash-table entry of 0 is always out of range. They wrap modulo 2^32.

use lzpack_core::error::{LzError, Result};
use lzpack_core::memory::try_filled_vec;
use std::io::{ErrorKind, Read};
use tracing::{trace, warn};

/// Extra history kept before the current position for the optimal parser.
pub const KEEP_EXTRA_BEFORE: u32 = 1 << 12;

/// Extra look-ahead kept after the current position.
pub const KEEP_EXTRA_AFTER: u32 = 273;

/// Sliding window over a byte source.
pub struct Window<'a> {
    reader: Box<dyn Read + 'a>,
    buf: Vec<u8>,
    cur: usize,
    pos: u32,
    stream_pos: u32,
    keep_before: usize,
    keep_after: u32,
    stream_end: bool,
    failure: Option<LzError>,
}

impl std::fmt::Debug for Window<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("block_size", &self.buf.len())
            .field("cur", &self.cur)
            .field("pos", &self.pos)
            .field("stream_pos", &self.stream_pos)
            .field("stream_end", &self.stream_end)
            .finish_non_exhaustive()
    }
}

impl<'a> Window<'a> {
    /// Allocate a window for `dict_size` bytes of history and matches of up
    /// to `match_max_len` bytes.
    pub fn new(reader: impl Read + 'a, dict_size: u32, match_max_len: u32) -> Result<Self> {
        let keep_before = u64::from(dict_size) + u64::from(KEEP_EXTRA_BEFORE) + 1;
        let keep_after = match_max_len + KEEP_EXTRA_AFTER;
        let history_reserve = if dict_size > (1 << 30) + (1 << 29) {
            dict_size >> 2
        } else {
            dict_size >> 1
        };
        let reserve = u64::from(history_reserve)
            + u64::from(KEEP_EXTRA_BEFORE + keep_after) / 2
            + (1 << 19);
        let block_size = keep_before + u64::from(keep_after) + reserve;
        let block_size = usize::try_from(block_size)
            .map_err(|_| LzError::out_of_memory(usize::MAX))?;

        Ok(Self {
            reader: Box::new(reader),
            buf: try_filled_vec(block_size, 0u8)?,
            cur: 0,
            pos: 0,
            stream_pos: 0,
            keep_before: keep_before as usize,
            keep_after,
            stream_end: false,
            failure: None,
        })
    }

    /// Start reading with the current position numbered `start_pos`.
    pub fn init(&mut self, start_pos: u32) {
        self.cur = 0;
        self.pos = start_pos;
        self.stream_pos = start_pos;
        self.stream_end = false;
        self.failure = None;
        self.read_block();
    }

    /// Bytes buffered in front of the current position.
    #[inline]
    pub fn available(&self) -> u32 {
        self.stream_pos.wrapping_sub(self.pos)
    }

    /// Position counter of the current byte.
    #[inline]
    pub fn pos(&self) -> u32 {
        self.pos
    }

    /// Position counter one past the last buffered byte.
    pub fn stream_pos(&self) -> u32 {
        self.stream_pos
    }

    /// Look-ahead that must stay buffered while input remains.
    pub fn keep_after(&self) -> u32 {
        self.keep_after
    }

    /// Whether the reader has reported end of input.
    pub fn stream_end(&self) -> bool {
        self.stream_end
    }

    /// The latched read failure, if any.
    pub fn failure(&self) -> Option<&LzError> {
        self.failure.as_ref()
    }

    /// Whole arena and the index of the current byte in it.
    #[inline]
    pub fn data(&self) -> (&[u8], usize) {
        (&self.buf, self.cur)
    }

    /// View anchored at the current byte.
    #[inline]
    pub fn view(&self) -> WindowView<'_> {
        WindowView {
            buf: &self.buf,
            cur: self.cur,
        }
    }

    /// Step past the current byte.
    #[inline]
    pub fn advance(&mut self) {
        self.cur += 1;
        self.pos = self.pos.wrapping_add(1);
    }

    /// Subtract `sub` from the position counters.
    pub fn reduce(&mut self, sub: u32) {
        self.pos = self.pos.wrapping_sub(sub);
        self.stream_pos = self.stream_pos.wrapping_sub(sub);
    }

    /// Fill the arena from the reader until the look-ahead is satisfied, the
    /// arena is full or the input ends.
    pub fn read_block(&mut self) {
        if self.stream_end || self.failure.is_some() {
            return;
        }
        loop {
            let start = self.cur + self.available() as usize;
            if start == self.buf.len() {
                return;
            }
            match self.reader.read(&mut self.buf[start..]) {
                Ok(0) => {
                    self.stream_end = true;
                    return;
                }
                Ok(count) => {
                    self.stream_pos = self.stream_pos.wrapping_add(count as u32);
                    if self.available() > self.keep_after {
                        return;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(error = %err, "input stream failed");
                    self.failure = Some(LzError::read_failed(err.to_string()));
                    return;
                }
            }
        }
    }

    /// Whether the space left at the end of the arena is down to the
    /// look-ahead size.
    pub fn need_move(&self) -> bool {
        self.buf.len() - self.cur <= self.keep_after as usize
    }

    /// Move the history and look-ahead to the start of the arena.
    pub fn move_block(&mut self) {
        let start = self.cur - self.keep_before;
        let end = self.cur + self.available() as usize;
        trace!(moved = end - start, "window compaction");
        self.buf.copy_within(start..end, 0);
        self.cur = self.keep_before;
    }

    /// Compact the arena if needed, then read more input.
    pub fn check_and_move(&mut self) {
        if self.need_move() {
            self.move_block();
        }
        self.read_block();
    }
}

/// Borrowed view of the window anchored at some position.
#[derive(Debug, Clone, Copy)]
pub struct WindowView<'w> {
    buf: &'w [u8],
    cur: usize,
}

impl<'w> WindowView<'w> {
    /// Re-anchor the view `delta` bytes away.
    #[inline]
    #[must_use]
    pub fn shift(self, delta: isize) -> Self {
        Self {
            buf: self.buf,
            cur: self.cur.wrapping_add_signed(delta),
        }
    }

    /// Byte `i` positions after the anchor.
    #[inline]
    pub fn byte(&self, i: usize) -> u8 {
        self.buf[self.cur + i]
    }

    /// Byte just before the anchor.
    #[inline]
    pub fn prev(&self) -> u8 {
        self.buf[self.cur - 1]
    }

    /// Byte `i` positions after the anchor, seen through zero-based distance
    /// `dist`.
    #[inline]
    pub fn back(&self, dist: u32, i: usize) -> u8 {
        self.buf[self.cur + i - dist as usize - 1]
    }

    /// Length of the match against zero-based distance `dist`, counting from
    /// `start` and stopping before `limit`.
    #[inline]
    pub fn match_len(&self, dist: u32, start: usize, limit: usize) -> usize {
        let src = self.cur - dist as usize - 1;
        let mut len = start;
        while len < limit && self.buf[self.cur + len] == self.buf[src + len] {
            len += 1;
        }
        len
    }

    /// Whether the first two bytes at the anchor repeat at distance `dist`.
    #[inline]
    pub fn starts_match(&self, dist: u32) -> bool {
        self.byte(0) == self.back(dist, 0) && self.byte(1) == self.back(dist, 1)
    }
}
