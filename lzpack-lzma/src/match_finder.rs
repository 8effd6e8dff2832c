//! Match finders over the sliding window.
//!
//! Two families share one core:
//! - [`BinaryTree`]: a binary search tree per hash bucket, with 2, 3 or 4
//!   hashed bytes. Each insertion re-roots the tree at the new position, so a
//!   search also maintains the index.
//! - [`HashChain`]: a singly linked chain per 4-byte hash bucket.
//!
//! Both probe small direct-mapped tables for 2- and 3-byte matches first and
//! report `(length, distance)` pairs in strictly increasing length order.
//!
//! Index entries are absolute positions. When the position counter reaches
//! the normalization limit, every entry is rebased; entries that fall out of
//! the window become empty (0).

use crate::props::EncoderConfig;
use crate::window::{Window, WindowView};
use lzpack_core::error::{LzError, Result};
use lzpack_core::memory::try_filled_vec;
use std::io::Read;
use tracing::{debug, trace};

const HASH2_SIZE: usize = 1 << 10;
const HASH3_SIZE: usize = 1 << 16;
const FIX3_HASH_SIZE: usize = HASH2_SIZE;
const FIX4_HASH_SIZE: usize = HASH2_SIZE + HASH3_SIZE;
const NORMALIZE_STEP_MIN: u32 = 1 << 10;

/// Empty index slot.
const EMPTY: u32 = 0;

static CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = i as u32;
        let mut j = 0;
        while j < 8 {
            r = (r >> 1) ^ (0xEDB8_8320 & (r & 1).wrapping_neg());
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

/// A match candidate: `len` bytes at zero-based distance `dist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchPair {
    /// Match length.
    pub len: u32,
    /// Distance minus one.
    pub dist: u32,
}

/// Interface between the parser and a match finder.
pub trait MatchFinder {
    /// Reset the index and load the first input block.
    fn init(&mut self);

    /// Bytes available from the current position.
    fn available(&self) -> u32;

    /// View of the window anchored at the current position.
    fn view(&self) -> WindowView<'_>;

    /// Collect the matches at the current position into `out` and advance
    /// one byte.
    fn get_matches(&mut self, out: &mut Vec<MatchPair>);

    /// Advance `num` bytes, indexing each skipped position.
    fn skip(&mut self, num: u32);

    /// The latched input failure, if any.
    fn failure(&self) -> Option<&LzError>;
}

/// Match finder geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinderConfig {
    /// History size in bytes.
    pub dict_size: u32,
    /// Longest match reported.
    pub match_max_len: u32,
    /// Bytes hashed for the main table (2..=4).
    pub hash_bytes: u32,
    /// Binary tree instead of hash chain.
    pub binary_tree: bool,
    /// Maximum candidates visited per search.
    pub cut_value: u32,
    /// Position value that triggers index normalization.
    pub normalize_limit: u32,
}

impl FinderConfig {
    /// Geometry for an encoder configuration.
    pub fn from_config(config: &EncoderConfig) -> Self {
        Self {
            dict_size: config.dict_size,
            match_max_len: config.fast_bytes,
            hash_bytes: if config.binary_tree { config.hash_bytes } else { 4 },
            binary_tree: config.binary_tree,
            cut_value: config.cycles,
            normalize_limit: u32::MAX,
        }
    }
}

/// Build the finder selected by `config`.
pub fn create<'a>(
    reader: impl Read + 'a,
    config: FinderConfig,
) -> Result<Box<dyn MatchFinder + 'a>> {
    let core = LzCore::new(reader, &config)?;
    if config.binary_tree {
        Ok(Box::new(BinaryTree {
            core,
            hash_bytes: config.hash_bytes,
        }))
    } else {
        Ok(Box::new(HashChain { core }))
    }
}

/// Main hash table mask for a dictionary size.
pub fn hash_mask(dict_size: u32, hash_bytes: u32) -> u32 {
    if hash_bytes == 2 {
        return 0xFFFF;
    }
    let mut hs = dict_size.saturating_sub(1);
    hs |= hs >> 1;
    hs |= hs >> 2;
    hs |= hs >> 4;
    hs |= hs >> 8;
    hs >>= 1;
    hs |= 0xFFFF;
    if hs > 1 << 24 {
        if hash_bytes == 3 {
            hs = (1 << 24) - 1;
        } else {
            hs >>= 1;
        }
    }
    hs
}

/// Rebase index entries by `sub`; entries at or below it become empty.
pub fn normalize_offsets(sub: u32, items: &mut [u32]) {
    for item in items {
        *item = if *item <= sub { EMPTY } else { *item - sub };
    }
}

/// Parameters of one search.
struct Search<'s> {
    buf: &'s [u8],
    cur: usize,
    pos: u32,
    cyclic_pos: u32,
    cyclic_size: u32,
    cut_value: u32,
    len_limit: u32,
}

impl Search<'_> {
    /// Cyclic slot of the position `delta` bytes back.
    #[inline]
    fn slot(&self, delta: u32) -> usize {
        let wrap = if delta > self.cyclic_pos {
            self.cyclic_size
        } else {
            0
        };
        (self.cyclic_pos + wrap - delta) as usize
    }

    #[inline]
    fn at(&self, back: usize, i: u32) -> u8 {
        self.buf[self.cur - back + i as usize]
    }
}

/// Result of probing the direct-mapped tables.
struct Probe {
    cur_match: u32,
    max_len: u32,
    complete: bool,
}

/// Extend a match at `delta` from `len` up to `limit`.
#[inline]
fn extend_match(buf: &[u8], cur: usize, delta: u32, mut len: u32, limit: u32) -> u32 {
    let src = cur - delta as usize;
    while len != limit && buf[src + len as usize] == buf[cur + len as usize] {
        len += 1;
    }
    len
}

fn tree_get_matches(
    s: &Search<'_>,
    son: &mut [u32],
    mut cur_match: u32,
    mut max_len: u32,
    out: &mut Vec<MatchPair>,
) {
    let mut ptr0 = ((s.cyclic_pos as usize) << 1) + 1;
    let mut ptr1 = (s.cyclic_pos as usize) << 1;
    let (mut len0, mut len1) = (0u32, 0u32);
    let mut cut = s.cut_value;
    loop {
        let delta = s.pos.wrapping_sub(cur_match);
        if cut == 0 || delta >= s.cyclic_size {
            son[ptr0] = EMPTY;
            son[ptr1] = EMPTY;
            return;
        }
        cut -= 1;

        let pair = s.slot(delta) << 1;
        let back = delta as usize;
        let mut len = len0.min(len1);
        if s.at(back, len) == s.at(0, len) {
            len += 1;
            while len != s.len_limit && s.at(back, len) == s.at(0, len) {
                len += 1;
            }
            if max_len < len {
                max_len = len;
                out.push(MatchPair {
                    len,
                    dist: delta - 1,
                });
                if len == s.len_limit {
                    son[ptr1] = son[pair];
                    son[ptr0] = son[pair + 1];
                    return;
                }
            }
        }
        if s.at(back, len) < s.at(0, len) {
            son[ptr1] = cur_match;
            ptr1 = pair + 1;
            cur_match = son[ptr1];
            len1 = len;
        } else {
            son[ptr0] = cur_match;
            ptr0 = pair;
            cur_match = son[ptr0];
            len0 = len;
        }
    }
}

fn tree_skip(s: &Search<'_>, son: &mut [u32], mut cur_match: u32) {
    let mut ptr0 = ((s.cyclic_pos as usize) << 1) + 1;
    let mut ptr1 = (s.cyclic_pos as usize) << 1;
    let (mut len0, mut len1) = (0u32, 0u32);
    let mut cut = s.cut_value;
    loop {
        let delta = s.pos.wrapping_sub(cur_match);
        if cut == 0 || delta >= s.cyclic_size {
            son[ptr0] = EMPTY;
            son[ptr1] = EMPTY;
            return;
        }
        cut -= 1;

        let pair = s.slot(delta) << 1;
        let back = delta as usize;
        let mut len = len0.min(len1);
        if s.at(back, len) == s.at(0, len) {
            len += 1;
            while len != s.len_limit && s.at(back, len) == s.at(0, len) {
                len += 1;
            }
            if len == s.len_limit {
                son[ptr1] = son[pair];
                son[ptr0] = son[pair + 1];
                return;
            }
        }
        if s.at(back, len) < s.at(0, len) {
            son[ptr1] = cur_match;
            ptr1 = pair + 1;
            cur_match = son[ptr1];
            len1 = len;
        } else {
            son[ptr0] = cur_match;
            ptr0 = pair;
            cur_match = son[ptr0];
            len0 = len;
        }
    }
}

fn chain_get_matches(
    s: &Search<'_>,
    son: &mut [u32],
    mut cur_match: u32,
    mut max_len: u32,
    out: &mut Vec<MatchPair>,
) {
    son[s.cyclic_pos as usize] = cur_match;
    let mut cut = s.cut_value;
    loop {
        let delta = s.pos.wrapping_sub(cur_match);
        if cut == 0 || delta >= s.cyclic_size {
            return;
        }
        cut -= 1;

        let back = delta as usize;
        cur_match = son[s.slot(delta)];
        if s.at(back, max_len) == s.at(0, max_len) && s.at(back, 0) == s.at(0, 0) {
            let mut len = 1;
            while len != s.len_limit && s.at(back, len) == s.at(0, len) {
                len += 1;
            }
            if max_len < len {
                max_len = len;
                out.push(MatchPair {
                    len,
                    dist: delta - 1,
                });
                if len == s.len_limit {
                    return;
                }
            }
        }
    }
}

/// State shared by all finder variants: the window, hash tables, the son
/// array and the position limits.
struct LzCore<'a> {
    window: Window<'a>,
    hash: Vec<u32>,
    son: Vec<u32>,
    hash_mask: u32,
    cyclic_pos: u32,
    cyclic_size: u32,
    pos_limit: u32,
    len_limit: u32,
    match_max_len: u32,
    cut_value: u32,
    normalize_limit: u32,
}

impl<'a> LzCore<'a> {
    fn new(reader: impl Read + 'a, config: &FinderConfig) -> Result<Self> {
        if !(2..=4).contains(&config.hash_bytes) {
            return Err(LzError::invalid_parameter(format!(
                "hash bytes {} outside 2..=4",
                config.hash_bytes
            )));
        }
        let cyclic_size = config.dict_size.checked_add(1).ok_or_else(|| {
            LzError::invalid_parameter("dictionary size overflows the cyclic buffer")
        })?;
        if config.normalize_limit <= cyclic_size.saturating_add(NORMALIZE_STEP_MIN) {
            return Err(LzError::invalid_parameter(
                "normalization limit below the cyclic buffer size",
            ));
        }

        let hash_mask = hash_mask(config.dict_size, config.hash_bytes);
        let mut fixed = 0;
        if config.hash_bytes > 2 {
            fixed += HASH2_SIZE;
        }
        if config.hash_bytes > 3 {
            fixed += HASH3_SIZE;
        }
        let hash_len = hash_mask as usize + 1 + fixed;
        let son_len = cyclic_size as usize * if config.binary_tree { 2 } else { 1 };

        let window = Window::new(reader, config.dict_size, config.match_max_len)?;
        let hash = try_filled_vec(hash_len, EMPTY)?;
        let son = try_filled_vec(son_len, EMPTY)?;
        debug!(
            dict_size = config.dict_size,
            hash_entries = hash_len,
            son_entries = son_len,
            binary_tree = config.binary_tree,
            hash_bytes = config.hash_bytes,
            "match finder allocated"
        );

        Ok(Self {
            window,
            hash,
            son,
            hash_mask,
            cyclic_pos: 0,
            cyclic_size,
            pos_limit: 0,
            len_limit: 0,
            match_max_len: config.match_max_len,
            cut_value: config.cut_value,
            normalize_limit: config.normalize_limit,
        })
    }

    fn init(&mut self) {
        self.hash.fill(EMPTY);
        self.cyclic_pos = 0;
        self.window.init(self.cyclic_size);
        self.set_limits();
    }

    fn set_limits(&mut self) {
        let pos = self.window.pos();
        let available = self.window.available();
        let keep_after = self.window.keep_after();

        let mut limit = self.normalize_limit.wrapping_sub(pos);
        limit = limit.min(self.cyclic_size - self.cyclic_pos);
        let read_limit = if available <= keep_after {
            available.min(1)
        } else {
            available - keep_after
        };
        limit = limit.min(read_limit);

        self.len_limit = available.min(self.match_max_len);
        self.pos_limit = pos.wrapping_add(limit);
    }

    fn check_limits(&mut self) {
        if self.window.pos() == self.normalize_limit {
            self.normalize();
        }
        if !self.window.stream_end() && self.window.keep_after() == self.window.available() {
            self.window.check_and_move();
        }
        if self.cyclic_pos == self.cyclic_size {
            self.cyclic_pos = 0;
        }
        self.set_limits();
    }

    fn normalize(&mut self) {
        let sub = self.window.pos().wrapping_sub(self.cyclic_size) & !(NORMALIZE_STEP_MIN - 1);
        trace!(sub, "rebasing match finder index");
        normalize_offsets(sub, &mut self.hash);
        normalize_offsets(sub, &mut self.son);
        self.pos_limit = self.pos_limit.wrapping_sub(sub);
        self.window.reduce(sub);
    }

    #[inline]
    fn move_pos(&mut self) {
        self.cyclic_pos += 1;
        self.window.advance();
        if self.window.pos() == self.pos_limit {
            self.check_limits();
        }
    }

    fn search(&mut self) -> (Search<'_>, &mut [u32]) {
        let (buf, cur) = self.window.data();
        let search = Search {
            buf,
            cur,
            pos: self.window.pos(),
            cyclic_pos: self.cyclic_pos,
            cyclic_size: self.cyclic_size,
            cut_value: self.cut_value,
            len_limit: self.len_limit,
        };
        (search, &mut self.son)
    }

    /// Record the current position in the hash tables and return the
    /// previous head of its main bucket.
    fn insert(&mut self, hash_bytes: u32) -> u32 {
        let pos = self.window.pos();
        let (buf, cur) = self.window.data();
        let table = &mut self.hash;
        match hash_bytes {
            2 => {
                let hv = usize::from(buf[cur]) | (usize::from(buf[cur + 1]) << 8);
                std::mem::replace(&mut table[hv], pos)
            }
            3 => {
                let temp = CRC_TABLE[usize::from(buf[cur])] ^ u32::from(buf[cur + 1]);
                let h2 = temp as usize & (HASH2_SIZE - 1);
                let hv = ((temp ^ (u32::from(buf[cur + 2]) << 8)) & self.hash_mask) as usize;
                table[h2] = pos;
                std::mem::replace(&mut table[FIX3_HASH_SIZE + hv], pos)
            }
            _ => {
                let temp = CRC_TABLE[usize::from(buf[cur])] ^ u32::from(buf[cur + 1]);
                let h2 = temp as usize & (HASH2_SIZE - 1);
                let temp = temp ^ (u32::from(buf[cur + 2]) << 8);
                let h3 = temp as usize & (HASH3_SIZE - 1);
                let hv = ((temp ^ (CRC_TABLE[usize::from(buf[cur + 3])] << 5)) & self.hash_mask)
                    as usize;
                table[h2] = pos;
                table[FIX3_HASH_SIZE + h3] = pos;
                std::mem::replace(&mut table[FIX4_HASH_SIZE + hv], pos)
            }
        }
    }

    /// Update the hash tables and probe the 2- and 3-byte tables.
    fn probe(&mut self, hash_bytes: u32, out: &mut Vec<MatchPair>) -> Probe {
        let pos = self.window.pos();
        let cyclic_size = self.cyclic_size;
        let len_limit = self.len_limit;
        let (buf, cur) = self.window.data();
        let table = &mut self.hash;
        let first_matches = |delta: u32| delta < cyclic_size && buf[cur - delta as usize] == buf[cur];

        match hash_bytes {
            2 => {
                let hv = usize::from(buf[cur]) | (usize::from(buf[cur + 1]) << 8);
                Probe {
                    cur_match: std::mem::replace(&mut table[hv], pos),
                    max_len: 1,
                    complete: false,
                }
            }
            3 => {
                let temp = CRC_TABLE[usize::from(buf[cur])] ^ u32::from(buf[cur + 1]);
                let h2 = temp as usize & (HASH2_SIZE - 1);
                let hv = ((temp ^ (u32::from(buf[cur + 2]) << 8)) & self.hash_mask) as usize;
                let delta2 = pos.wrapping_sub(std::mem::replace(&mut table[h2], pos));
                let cur_match = std::mem::replace(&mut table[FIX3_HASH_SIZE + hv], pos);

                let mut max_len = 2;
                let mut complete = false;
                if first_matches(delta2) {
                    max_len = extend_match(buf, cur, delta2, max_len, len_limit);
                    out.push(MatchPair {
                        len: max_len,
                        dist: delta2 - 1,
                    });
                    complete = max_len == len_limit;
                }
                Probe {
                    cur_match,
                    max_len,
                    complete,
                }
            }
            _ => {
                let temp = CRC_TABLE[usize::from(buf[cur])] ^ u32::from(buf[cur + 1]);
                let h2 = temp as usize & (HASH2_SIZE - 1);
                let temp = temp ^ (u32::from(buf[cur + 2]) << 8);
                let h3 = temp as usize & (HASH3_SIZE - 1);
                let hv = ((temp ^ (CRC_TABLE[usize::from(buf[cur + 3])] << 5)) & self.hash_mask)
                    as usize;
                let mut delta2 = pos.wrapping_sub(std::mem::replace(&mut table[h2], pos));
                let delta3 =
                    pos.wrapping_sub(std::mem::replace(&mut table[FIX3_HASH_SIZE + h3], pos));
                let cur_match = std::mem::replace(&mut table[FIX4_HASH_SIZE + hv], pos);

                let mut max_len = 1;
                if first_matches(delta2) {
                    max_len = 2;
                    out.push(MatchPair {
                        len: 2,
                        dist: delta2 - 1,
                    });
                }
                if delta2 != delta3 && first_matches(delta3) {
                    max_len = 3;
                    out.push(MatchPair {
                        len: 3,
                        dist: delta3 - 1,
                    });
                    delta2 = delta3;
                }
                if let Some(last) = out.last_mut() {
                    max_len = extend_match(buf, cur, delta2, max_len, len_limit);
                    last.len = max_len;
                    if max_len == len_limit {
                        return Probe {
                            cur_match,
                            max_len,
                            complete: true,
                        };
                    }
                }
                Probe {
                    cur_match,
                    max_len: max_len.max(3),
                    complete: false,
                }
            }
        }
    }
}

/// Binary tree match finder (BT2, BT3, BT4).
pub struct BinaryTree<'a> {
    core: LzCore<'a>,
    hash_bytes: u32,
}

impl MatchFinder for BinaryTree<'_> {
    fn init(&mut self) {
        self.core.init();
    }

    fn available(&self) -> u32 {
        self.core.window.available()
    }

    fn view(&self) -> WindowView<'_> {
        self.core.window.view()
    }

    fn get_matches(&mut self, out: &mut Vec<MatchPair>) {
        out.clear();
        let core = &mut self.core;
        if core.len_limit < self.hash_bytes {
            core.move_pos();
            return;
        }
        let probe = core.probe(self.hash_bytes, out);
        let (search, son) = core.search();
        if probe.complete {
            tree_skip(&search, son, probe.cur_match);
        } else {
            tree_get_matches(&search, son, probe.cur_match, probe.max_len, out);
        }
        core.move_pos();
    }

    fn skip(&mut self, num: u32) {
        let core = &mut self.core;
        for _ in 0..num {
            if core.len_limit < self.hash_bytes {
                core.move_pos();
                continue;
            }
            let cur_match = core.insert(self.hash_bytes);
            let (search, son) = core.search();
            tree_skip(&search, son, cur_match);
            core.move_pos();
        }
    }

    fn failure(&self) -> Option<&LzError> {
        self.core.window.failure()
    }
}

/// Hash chain match finder (HC4).
pub struct HashChain<'a> {
    core: LzCore<'a>,
}

impl MatchFinder for HashChain<'_> {
    fn init(&mut self) {
        self.core.init();
    }

    fn available(&self) -> u32 {
        self.core.window.available()
    }

    fn view(&self) -> WindowView<'_> {
        self.core.window.view()
    }

    fn get_matches(&mut self, out: &mut Vec<MatchPair>) {
        out.clear();
        let core = &mut self.core;
        if core.len_limit < 4 {
            core.move_pos();
            return;
        }
        let probe = core.probe(4, out);
        let (search, son) = core.search();
        if probe.complete {
            son[search.cyclic_pos as usize] = probe.cur_match;
        } else {
            chain_get_matches(&search, son, probe.cur_match, probe.max_len, out);
        }
        core.move_pos();
    }

    fn skip(&mut self, num: u32) {
        let core = &mut self.core;
        for _ in 0..num {
            if core.len_limit < 4 {
                core.move_pos();
                continue;
            }
            let cur_match = core.insert(4);
            let cyclic_pos = core.cyclic_pos as usize;
            core.son[cyclic_pos] = cur_match;
            core.move_pos();
        }
    }

    fn failure(&self) -> Option<&LzError> {
        self.core.window.failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        let words: [&[u8]; 8] = [
            b"firmware ", b"volume ", b"section ", b"guid ", b"lzma ", b"\x00\x00\x00\x00",
            b"header ", b"\xFF\xFF",
        ];
        let mut state = 0x2545_F491u32;
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if state % 5 == 0 {
                data.push((state >> 24) as u8);
            } else {
                data.extend_from_slice(words[(state >> 8) as usize % words.len()]);
            }
        }
        data.truncate(len);
        data
    }

    fn config(hash_bytes: u32, binary_tree: bool) -> FinderConfig {
        FinderConfig {
            dict_size: 1 << 12,
            match_max_len: 32,
            hash_bytes,
            binary_tree,
            cut_value: 1 << 16,
            normalize_limit: u32::MAX,
        }
    }

    fn longest_match(data: &[u8], pos: usize, dict: usize, limit: usize) -> usize {
        let limit = limit.min(data.len() - pos);
        (pos.saturating_sub(dict)..pos)
            .map(|src| {
                (0..limit)
                    .take_while(|&i| data[src + i] == data[pos + i])
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    fn collect(finder: &mut dyn MatchFinder, steps: &[u32]) -> Vec<Vec<MatchPair>> {
        let mut all = Vec::new();
        let mut out = Vec::new();
        let mut step = steps.iter().cycle();
        finder.init();
        while finder.available() > 0 {
            finder.get_matches(&mut out);
            all.push(out.clone());
            let skip = (*step.next().unwrap_or(&0)).min(finder.available());
            if skip > 0 {
                finder.skip(skip);
            }
        }
        all
    }

    #[test]
    fn test_crc_table() {
        assert_eq!(CRC_TABLE[0], 0);
        assert_eq!(CRC_TABLE[1], 0x7707_3096);
        assert_eq!(CRC_TABLE[255], 0x2D02_EF8D);
    }

    #[test]
    fn test_hash_mask() {
        assert_eq!(hash_mask(1 << 12, 4), 0xFFFF);
        assert_eq!(hash_mask(1 << 24, 4), 0x7F_FFFF);
        assert_eq!(hash_mask(1 << 26, 4), 0xFF_FFFF);
        assert_eq!(hash_mask(1 << 26, 3), 0xFF_FFFF);
        assert_eq!(hash_mask(1 << 26, 2), 0xFFFF);
    }

    #[test]
    fn test_normalize_offsets() {
        let mut items = [0, 5, 1024, 1025, 9000];
        normalize_offsets(1024, &mut items);
        assert_eq!(items, [0, 0, 0, 1, 7976]);
    }

    #[test]
    fn test_pairs_are_genuine_and_longest() {
        let data = sample(9_000);
        for (hash_bytes, binary_tree) in [(4, true), (4, false)] {
            let cfg = config(hash_bytes, binary_tree);
            let mut finder = create(&data[..], cfg).unwrap();
            let results = collect(finder.as_mut(), &[0]);
            assert_eq!(results.len(), data.len());

            for (pos, pairs) in results.iter().enumerate() {
                let limit = (data.len() - pos).min(32) as u32;
                let mut prev_len = 0;
                for pair in pairs {
                    assert!(pair.len > prev_len, "lengths must increase at {pos}");
                    prev_len = pair.len;
                    let src = pos - pair.dist as usize - 1;
                    let len = pair.len as usize;
                    assert_eq!(data[src..src + len], data[pos..pos + len]);
                    assert!(pair.len == limit || data[src + len] != data[pos + len]);
                }
                if limit >= 4 {
                    let best = longest_match(&data, pos, 1 << 12, 32) as u32;
                    if best >= 4 {
                        assert_eq!(prev_len, best, "missed longest match at {pos}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_cyclic_buffer_wraps_on_long_runs() {
        let data = vec![0u8; 100_000];
        for (hash_bytes, binary_tree) in [(2, true), (4, true), (4, false)] {
            let mut finder = create(&data[..], config(hash_bytes, binary_tree)).unwrap();
            let mut out = Vec::new();
            let mut pos = 0usize;
            finder.init();
            while finder.available() > 0 {
                finder.get_matches(&mut out);
                if pos >= 1 && pos + 32 <= data.len() {
                    let last = out.last().copied().unwrap_or_default();
                    assert_eq!(last, MatchPair { len: 32, dist: 0 }, "at {pos}");
                }
                assert!(out.iter().all(|pair| pair.dist < 1 << 12));
                pos += 1;
                if pos % 97 == 0 {
                    let skip = 5.min(finder.available());
                    finder.skip(skip);
                    pos += skip as usize;
                }
            }
            assert_eq!(pos, data.len());
        }
    }

    #[test]
    fn test_all_variants_report_valid_pairs_with_skips() {
        let data = sample(20_000);
        for (hash_bytes, binary_tree) in [(2, true), (3, true), (4, true), (4, false)] {
            let mut finder = create(&data[..], config(hash_bytes, binary_tree)).unwrap();
            let mut out = Vec::new();
            let mut pos = 0usize;
            finder.init();
            while finder.available() > 0 {
                finder.get_matches(&mut out);
                for pair in &out {
                    let src = pos - pair.dist as usize - 1;
                    let len = pair.len as usize;
                    assert!(pair.dist < 1 << 12);
                    assert_eq!(data[src..src + len], data[pos..pos + len]);
                }
                pos += 1;
                let skip = (pos as u32 % 3).min(finder.available());
                if skip > 0 {
                    finder.skip(skip);
                    pos += skip as usize;
                }
            }
            assert_eq!(pos, data.len());
        }
    }

    #[test]
    fn test_normalization_is_transparent() {
        let data = sample(40_000);
        for binary_tree in [true, false] {
            let plain = config(4, binary_tree);
            let rebased = FinderConfig {
                normalize_limit: 8192,
                ..plain
            };
            let mut a = create(&data[..], plain).unwrap();
            let mut b = create(&data[..], rebased).unwrap();
            let steps = [0, 2, 0, 0, 5, 1];
            assert_eq!(collect(a.as_mut(), &steps), collect(b.as_mut(), &steps));
        }
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let data = [0u8; 16];
        assert!(create(&data[..], config(5, true)).is_err());
        let low = FinderConfig {
            normalize_limit: 4096,
            ..config(4, true)
        };
        assert!(create(&data[..], low).is_err());
    }
}
