//! LZMA probability models.
//!
//! LZMA uses context-dependent probability models for:
//! - Literal encoding (context = previous byte + position)
//! - Match length encoding
//! - Distance encoding
//! - State machine transitions
//!
//! Every cell is an 11-bit fixed-point probability that the next bit is 0.

use lzpack_core::error::Result;
use lzpack_core::memory::try_filled_vec;

/// Number of bits in probability model.
pub const PROB_BITS: u32 = 11;

/// Maximum probability value.
pub const PROB_MAX: u32 = 1 << PROB_BITS;

/// Initial probability (50%).
pub const PROB_INIT: u16 = 1 << (PROB_BITS - 1);

/// Number of bits to shift for probability update.
pub const MOVE_BITS: u32 = 5;

/// Maximum number of position states.
pub const POS_STATES_MAX: usize = 1 << 4;

/// Number of states in the LZMA state machine.
pub const NUM_STATES: usize = 12;

/// Number of repeat distances.
pub const NUM_REPS: usize = 4;

/// Number of bits for low length coding.
pub const LEN_LOW_BITS: u32 = 3;
/// Number of bits for mid length coding.
pub const LEN_MID_BITS: u32 = 3;
/// Number of bits for high length coding.
pub const LEN_HIGH_BITS: u32 = 8;

/// Number of low length symbols.
pub const LEN_LOW_SYMBOLS: usize = 1 << LEN_LOW_BITS;
/// Number of mid length symbols.
pub const LEN_MID_SYMBOLS: usize = 1 << LEN_MID_BITS;
/// Number of high length symbols.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;
/// Total number of length symbols.
pub const LEN_SYMBOLS: usize = LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + LEN_HIGH_SYMBOLS;

/// Minimum match length.
pub const MATCH_LEN_MIN: u32 = 2;

/// Maximum match length.
pub const MATCH_LEN_MAX: u32 = MATCH_LEN_MIN + LEN_SYMBOLS as u32 - 1;

/// Number of length-to-position states used to select a slot tree.
pub const LEN_TO_POS_STATES: usize = 4;

/// Number of bits in a distance slot.
pub const POS_SLOT_BITS: u32 = 6;

/// Number of distance slots.
pub const DIST_SLOTS: usize = 1 << POS_SLOT_BITS;

/// First slot whose low bits are coded with a reverse tree.
pub const START_POS_MODEL_INDEX: u32 = 4;

/// First slot whose low bits are coded as direct bits plus alignment.
pub const END_POS_MODEL_INDEX: u32 = 14;

/// Distances below this value have fully modeled footer bits.
pub const FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX >> 1);

/// Number of alignment bits for distance encoding.
pub const ALIGN_BITS: u32 = 4;
/// Size of alignment table.
pub const ALIGN_SIZE: usize = 1 << ALIGN_BITS;
/// Mask selecting the alignment bits of a distance.
pub const ALIGN_MASK: u32 = ALIGN_SIZE as u32 - 1;

/// Probabilities per literal coder (256 normal + 512 matched).
pub const LITERAL_CODER_SIZE: usize = 0x300;

/// Cells of the slot 4-13 footer trees, plus one spare.
pub const SPECIAL_SIZE: usize = FULL_DISTANCES - END_POS_MODEL_INDEX as usize + 1;

const LITERAL_NEXT: [u8; NUM_STATES] = [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 4, 5];
const MATCH_NEXT: [u8; NUM_STATES] = [7, 7, 7, 7, 7, 7, 7, 10, 10, 10, 10, 10];
const REP_NEXT: [u8; NUM_STATES] = [8, 8, 8, 8, 8, 8, 8, 11, 11, 11, 11, 11];
const SHORT_REP_NEXT: [u8; NUM_STATES] = [9, 9, 9, 9, 9, 9, 9, 11, 11, 11, 11, 11];

/// LZMA state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get state value.
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// Whether the last symbol was a literal, so literals use the plain coder.
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// State after coding a literal.
    #[must_use]
    pub fn after_literal(self) -> Self {
        Self(LITERAL_NEXT[self.value()])
    }

    /// State after coding a match with a new distance.
    #[must_use]
    pub fn after_match(self) -> Self {
        Self(MATCH_NEXT[self.value()])
    }

    /// State after coding a repeat match.
    #[must_use]
    pub fn after_rep(self) -> Self {
        Self(REP_NEXT[self.value()])
    }

    /// State after coding a one-byte rep0 match.
    #[must_use]
    pub fn after_short_rep(self) -> Self {
        Self(SHORT_REP_NEXT[self.value()])
    }
}

/// The four most recently used distances, most recent first.
///
/// Values are zero-based (distance minus one), as they are coded. A new
/// stream starts with all four set to zero, so entries repeat until four
/// distinct distances have been coded; `push` never deduplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepDistances(pub [u32; NUM_REPS]);

impl RepDistances {
    /// Distance at `index`.
    pub fn get(&self, index: usize) -> u32 {
        self.0[index]
    }

    /// Record a new match distance.
    pub fn push(&mut self, dist: u32) {
        self.0.copy_within(0..NUM_REPS - 1, 1);
        self.0[0] = dist;
    }

    /// Move the entry at `index` to the front.
    pub fn promote(&mut self, index: usize) {
        let dist = self.0[index];
        self.0.copy_within(0..index, 1);
        self.0[0] = dist;
    }

    /// Apply a coded back reference: rep index below 4, new distance above.
    pub fn apply(&mut self, back: u32) {
        if (back as usize) < NUM_REPS {
            self.promote(back as usize);
        } else {
            self.push(back - NUM_REPS as u32);
        }
    }
}

/// Map a match length to its length-to-position state.
pub fn len_to_pos_state(len: u32) -> usize {
    if len < LEN_TO_POS_STATES as u32 + 1 {
        (len - 2) as usize
    } else {
        LEN_TO_POS_STATES - 1
    }
}

/// Distance slot of a zero-based distance.
pub fn dist_slot(dist: u32) -> u32 {
    if dist < START_POS_MODEL_INDEX {
        return dist;
    }
    let top = 31 - dist.leading_zeros();
    (top << 1) | ((dist >> (top - 1)) & 1)
}

/// Length coder probabilities.
#[derive(Debug, Clone)]
pub struct LengthProbs {
    /// Choice bit (low vs mid+high).
    pub choice: u16,
    /// Choice2 bit (mid vs high).
    pub choice2: u16,
    /// Low length trees, one per position state.
    pub low: [[u16; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
    /// Mid length trees, one per position state.
    pub mid: [[u16; LEN_MID_SYMBOLS]; POS_STATES_MAX],
    /// High length tree (shared).
    pub high: [u16; LEN_HIGH_SYMBOLS],
}

impl LengthProbs {
    /// Create a length model at initial probabilities.
    pub fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
            mid: [[PROB_INIT; LEN_MID_SYMBOLS]; POS_STATES_MAX],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
        }
    }

    /// Reset the model.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for LengthProbs {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete LZMA model containing all probability tables.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    lc: u32,
    lp_mask: u32,

    /// Literal coders, `0x300` cells per context.
    pub literal: Vec<u16>,
    /// Is-match probabilities.
    pub is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Is-rep probabilities.
    pub is_rep: [u16; NUM_STATES],
    /// Is-rep0 probabilities.
    pub is_rep_g0: [u16; NUM_STATES],
    /// Is-rep1 probabilities.
    pub is_rep_g1: [u16; NUM_STATES],
    /// Is-rep2 probabilities.
    pub is_rep_g2: [u16; NUM_STATES],
    /// Is-rep0-long probabilities.
    pub is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Distance slot trees, per length-to-position state.
    pub pos_slot: [[u16; DIST_SLOTS]; LEN_TO_POS_STATES],
    /// Reverse trees for the footer bits of slots 4-13. Cell 0 is unused.
    pub pos_special: [u16; SPECIAL_SIZE],
    /// Alignment tree.
    pub pos_align: [u16; ALIGN_SIZE],
    /// Match length model.
    pub match_len: LengthProbs,
    /// Rep match length model.
    pub rep_len: LengthProbs,
}

impl LzmaModel {
    /// Create a new model for the given literal context and position bits.
    pub fn new(lc: u32, lp: u32) -> Result<Self> {
        Ok(Self {
            lc,
            lp_mask: (1 << lp) - 1,
            literal: try_filled_vec(LITERAL_CODER_SIZE << (lc + lp), PROB_INIT)?,
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            pos_slot: [[PROB_INIT; DIST_SLOTS]; LEN_TO_POS_STATES],
            pos_special: [PROB_INIT; SPECIAL_SIZE],
            pos_align: [PROB_INIT; ALIGN_SIZE],
            match_len: LengthProbs::new(),
            rep_len: LengthProbs::new(),
        })
    }

    /// Reset all probabilities to initial values.
    pub fn reset(&mut self) {
        self.literal.fill(PROB_INIT);
        for row in &mut self.is_match {
            row.fill(PROB_INIT);
        }
        self.is_rep.fill(PROB_INIT);
        self.is_rep_g0.fill(PROB_INIT);
        self.is_rep_g1.fill(PROB_INIT);
        self.is_rep_g2.fill(PROB_INIT);
        for row in &mut self.is_rep0_long {
            row.fill(PROB_INIT);
        }
        for tree in &mut self.pos_slot {
            tree.fill(PROB_INIT);
        }
        self.pos_special.fill(PROB_INIT);
        self.pos_align.fill(PROB_INIT);
        self.match_len.reset();
        self.rep_len.reset();
    }

    fn literal_base(&self, pos: u32, prev_byte: u8) -> usize {
        let context = ((pos & self.lp_mask) << self.lc) + (u32::from(prev_byte) >> (8 - self.lc));
        context as usize * LITERAL_CODER_SIZE
    }

    /// Literal coder for the byte at `pos` following `prev_byte`.
    pub fn literal_probs(&self, pos: u32, prev_byte: u8) -> &[u16] {
        let base = self.literal_base(pos, prev_byte);
        &self.literal[base..base + LITERAL_CODER_SIZE]
    }

    /// Mutable literal coder for the byte at `pos` following `prev_byte`.
    pub fn literal_probs_mut(&mut self, pos: u32, prev_byte: u8) -> &mut [u16] {
        let base = self.literal_base(pos, prev_byte);
        &mut self.literal[base..base + LITERAL_CODER_SIZE]
    }
}

/// Start of the reverse tree for `slot` inside [`LzmaModel::pos_special`].
///
/// Tree node `m` (starting at 1) of the slot lives at `special_base(slot) + m`.
pub fn special_base(slot: u32) -> usize {
    let footer_bits = (slot >> 1) - 1;
    let base = (2 | (slot & 1)) << footer_bits;
    (base - slot) as usize
}
