//! Encoder configuration and the 5-byte properties header.
//!
//! [`EncoderProps`] is what callers fill in: every field is optional, and a
//! missing value is derived from the compression level. [`EncoderProps::normalize`]
//! resolves the defaults and validates the result into an [`EncoderConfig`],
//! the fully specified form the session is built from.

use lzpack_core::error::{LzError, Result};
use serde::{Deserialize, Serialize};

/// Size of the encoded properties header.
pub const PROPS_SIZE: usize = 5;

/// Default compression level.
pub const LEVEL_DEFAULT: u32 = 5;

/// Highest accepted compression level.
pub const LEVEL_MAX: u32 = 9;

/// Maximum literal context bits.
pub const LC_MAX: u32 = 8;

/// Maximum literal position bits.
pub const LP_MAX: u32 = 4;

/// Maximum position bits.
pub const PB_MAX: u32 = 4;

/// Largest dictionary the encoder accepts.
pub const DICT_SIZE_MAX: u32 = 3 << 29;

/// Smallest dictionary the encoder works with; smaller requests are raised.
pub const DICT_SIZE_MIN: u32 = 1 << 12;

/// Shortest fast-bytes threshold.
pub const FAST_BYTES_MIN: u32 = 5;

/// Longest fast-bytes threshold (the maximum match length).
pub const FAST_BYTES_MAX: u32 = 273;

/// Parsing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Greedy one-step lookahead.
    Fast,
    /// Price-graph optimal parsing.
    Normal,
}

/// Match finder index structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFinderKind {
    /// Hash chains over 4-byte prefixes.
    HashChain,
    /// Binary trees keyed by 2, 3 or 4 hash bytes.
    BinaryTree,
}

/// User-facing encoder properties. `None` means "derive from the level".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderProps {
    /// Compression level 0-9.
    pub level: Option<u32>,
    /// Dictionary (history) size in bytes. Zero means default.
    pub dict_size: Option<u32>,
    /// Literal context bits, 0-8.
    pub lc: Option<u32>,
    /// Literal position bits, 0-4.
    pub lp: Option<u32>,
    /// Position bits, 0-4.
    pub pb: Option<u32>,
    /// Parsing strategy.
    pub algo: Option<Algorithm>,
    /// Match length at which a candidate is taken without further search.
    pub fast_bytes: Option<u32>,
    /// Match finder structure.
    pub match_finder: Option<MatchFinderKind>,
    /// Number of bytes hashed by the binary tree finder, 2-4.
    pub hash_bytes: Option<u32>,
    /// Maximum number of candidates visited per search. Zero means default.
    pub cycles: Option<u32>,
    /// Terminate the stream with an end marker.
    pub write_end_marker: bool,
    /// Requested thread count, at least 1. Accepted and ignored.
    pub threads: Option<u32>,
}

impl EncoderProps {
    /// Properties for the given level with everything else defaulted.
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Some(level),
            ..Self::default()
        }
    }

    /// Set the dictionary size.
    pub fn dict_size(mut self, dict_size: u32) -> Self {
        self.dict_size = Some(dict_size);
        self
    }

    /// Set the literal context, literal position and position bits.
    pub fn literal_bits(mut self, lc: u32, lp: u32, pb: u32) -> Self {
        self.lc = Some(lc);
        self.lp = Some(lp);
        self.pb = Some(pb);
        self
    }

    /// Set the parsing strategy.
    pub fn algorithm(mut self, algo: Algorithm) -> Self {
        self.algo = Some(algo);
        self
    }

    /// Set the match finder structure.
    pub fn match_finder(mut self, kind: MatchFinderKind) -> Self {
        self.match_finder = Some(kind);
        self
    }

    /// Set the fast-bytes threshold.
    pub fn fast_bytes(mut self, fast_bytes: u32) -> Self {
        self.fast_bytes = Some(fast_bytes);
        self
    }

    /// Set the number of hash bytes for the binary tree finder.
    pub fn hash_bytes(mut self, hash_bytes: u32) -> Self {
        self.hash_bytes = Some(hash_bytes);
        self
    }

    /// Set the search cycle cap.
    pub fn cycles(mut self, cycles: u32) -> Self {
        self.cycles = Some(cycles);
        self
    }

    /// Request an end-of-stream marker.
    pub fn end_marker(mut self, write_end_marker: bool) -> Self {
        self.write_end_marker = write_end_marker;
        self
    }

    /// Resolve defaults and validate ranges.
    pub fn normalize(&self) -> Result<EncoderConfig> {
        let level = self.level.unwrap_or(LEVEL_DEFAULT);
        if level > LEVEL_MAX {
            return Err(LzError::invalid_parameter(format!(
                "level {level} exceeds {LEVEL_MAX}"
            )));
        }

        let dict_size = match self.dict_size {
            Some(size) if size != 0 => size,
            _ => default_dict_size(level),
        };
        if dict_size > DICT_SIZE_MAX {
            return Err(LzError::invalid_parameter(format!(
                "dictionary size {dict_size} exceeds {DICT_SIZE_MAX}"
            )));
        }

        let lc = self.lc.unwrap_or(3);
        let lp = self.lp.unwrap_or(0);
        let pb = self.pb.unwrap_or(2);
        if lc > LC_MAX {
            return Err(LzError::invalid_parameter(format!("lc {lc} exceeds {LC_MAX}")));
        }
        if lp > LP_MAX {
            return Err(LzError::invalid_parameter(format!("lp {lp} exceeds {LP_MAX}")));
        }
        if pb > PB_MAX {
            return Err(LzError::invalid_parameter(format!("pb {pb} exceeds {PB_MAX}")));
        }

        let algo = self
            .algo
            .unwrap_or(if level < 5 { Algorithm::Fast } else { Algorithm::Normal });
        let fast_bytes = self
            .fast_bytes
            .unwrap_or(if level < 7 { 32 } else { 64 })
            .clamp(FAST_BYTES_MIN, FAST_BYTES_MAX);
        let binary_tree = match self.match_finder {
            Some(kind) => kind == MatchFinderKind::BinaryTree,
            None => algo == Algorithm::Normal,
        };
        let hash_bytes = if binary_tree {
            self.hash_bytes.unwrap_or(4).clamp(2, 4)
        } else {
            4
        };
        let cycles = match self.cycles {
            Some(cycles) if cycles != 0 => cycles,
            _ => (16 + (fast_bytes >> 1)) >> if binary_tree { 0 } else { 1 },
        };

        let threads = self.threads.unwrap_or(
            if binary_tree && algo == Algorithm::Normal {
                2
            } else {
                1
            },
        );
        if threads == 0 {
            return Err(LzError::invalid_parameter("thread count must be at least 1"));
        }

        Ok(EncoderConfig {
            level,
            dict_size: dict_size.max(DICT_SIZE_MIN),
            lc,
            lp,
            pb,
            fast_mode: algo == Algorithm::Fast,
            binary_tree,
            hash_bytes,
            cycles,
            fast_bytes,
            write_end_marker: self.write_end_marker,
            threads,
        })
    }
}

/// Dictionary size implied by a compression level.
pub fn default_dict_size(level: u32) -> u32 {
    match level {
        0..=5 => 1 << (level * 2 + 14),
        6 => 1 << 25,
        _ => 1 << 26,
    }
}

/// Round a dictionary size up to the nearest `2 << i` or `3 << i`, i in 11..=30.
pub fn rounded_dict_size(dict_size: u32) -> u32 {
    for i in 11..=30u32 {
        let two = 2u64 << i;
        if u64::from(dict_size) <= two {
            return two as u32;
        }
        let three = 3u64 << i;
        if u64::from(dict_size) <= three {
            return three as u32;
        }
    }
    dict_size
}

/// Fully resolved encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Compression level the defaults were derived from.
    pub level: u32,
    /// Dictionary size in bytes.
    pub dict_size: u32,
    /// Literal context bits.
    pub lc: u32,
    /// Literal position bits.
    pub lp: u32,
    /// Position bits.
    pub pb: u32,
    /// Greedy parsing instead of optimal parsing.
    pub fast_mode: bool,
    /// Binary tree match finder instead of hash chains.
    pub binary_tree: bool,
    /// Bytes hashed by the match finder.
    pub hash_bytes: u32,
    /// Search cycle cap.
    pub cycles: u32,
    /// Fast-bytes threshold.
    pub fast_bytes: u32,
    /// Whether the stream ends with an end marker.
    pub write_end_marker: bool,
    /// Requested thread count (informational).
    pub threads: u32,
}

impl EncoderConfig {
    /// Encode the 5-byte properties header.
    pub fn properties(&self) -> [u8; PROPS_SIZE] {
        let mut header = [0u8; PROPS_SIZE];
        header[0] = ((self.pb * 5 + self.lp) * 9 + self.lc) as u8;
        header[1..].copy_from_slice(&rounded_dict_size(self.dict_size).to_le_bytes());
        header
    }

    /// Number of position states.
    pub fn num_pos_states(&self) -> usize {
        1 << self.pb
    }
}
