//! Bit-cost estimates used by the optimal parser.
//!
//! Prices are fixed-point: 16 units per bit. They are derived from the live
//! probability model, so the tables here are refreshed as the model adapts.

use crate::model::{
    ALIGN_BITS, ALIGN_MASK, ALIGN_SIZE, DIST_SLOTS, END_POS_MODEL_INDEX, FULL_DISTANCES,
    LEN_HIGH_BITS, LEN_LOW_BITS, LEN_LOW_SYMBOLS, LEN_MID_BITS, LEN_MID_SYMBOLS, LEN_SYMBOLS,
    LEN_TO_POS_STATES, LengthProbs, LzmaModel, MATCH_LEN_MIN, POS_SLOT_BITS, POS_STATES_MAX,
    PROB_BITS, START_POS_MODEL_INDEX, dist_slot, special_base,
};

/// Fixed-point fraction bits of a price.
pub const PRICE_SHIFT_BITS: u32 = 4;

/// Price of an unreachable parse node.
pub const INFINITY_PRICE: u32 = 1 << 30;

/// Distance price tables are rebuilt after this many coded matches.
pub const DIST_PRICE_REFRESH: u32 = 1 << 7;

const MOVE_REDUCING_BITS: u32 = 4;
const PRICE_TABLE_SIZE: usize = 1 << (PROB_BITS - MOVE_REDUCING_BITS);

/// `-log2(p)` for every reduced probability, in price units.
pub static PROB_PRICES: [u32; PRICE_TABLE_SIZE] = build_prob_prices();

const fn build_prob_prices() -> [u32; PRICE_TABLE_SIZE] {
    let mut table = [0u32; PRICE_TABLE_SIZE];
    let mut i = 0;
    while i < PRICE_TABLE_SIZE {
        let mut w = ((i as u32) << MOVE_REDUCING_BITS) + (1 << (MOVE_REDUCING_BITS - 1));
        let mut bit_count = 0u32;
        let mut cycle = 0;
        while cycle < PRICE_SHIFT_BITS {
            w *= w;
            bit_count <<= 1;
            while w >= 1 << 16 {
                w >>= 1;
                bit_count += 1;
            }
            cycle += 1;
        }
        table[i] = (PROB_BITS << PRICE_SHIFT_BITS) - 15 - bit_count;
        i += 1;
    }
    table
}

/// Price of coding `bit` with probability `prob`.
#[inline(always)]
pub fn bit_price(prob: u16, bit: u32) -> u32 {
    let mask = 0u32.wrapping_sub(bit) & ((1 << PROB_BITS) - 1);
    PROB_PRICES[((u32::from(prob) ^ mask) >> MOVE_REDUCING_BITS) as usize]
}

/// Price of coding a 0 bit.
#[inline(always)]
pub fn price0(prob: u16) -> u32 {
    PROB_PRICES[(prob >> MOVE_REDUCING_BITS) as usize]
}

/// Price of coding a 1 bit.
#[inline(always)]
pub fn price1(prob: u16) -> u32 {
    PROB_PRICES[((prob ^ ((1 << PROB_BITS) - 1)) >> MOVE_REDUCING_BITS) as usize]
}

/// Price of a `num_bits` symbol coded MSB first through a bit tree.
pub fn tree_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0;
    let mut symbol = symbol | (1 << num_bits);
    while symbol != 1 {
        price += bit_price(probs[(symbol >> 1) as usize], symbol & 1);
        symbol >>= 1;
    }
    price
}

/// Price of a `num_bits` symbol coded LSB first through a bit tree.
pub fn reverse_tree_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0;
    let mut symbol = symbol;
    let mut m = 1usize;
    for _ in 0..num_bits {
        let bit = symbol & 1;
        symbol >>= 1;
        price += bit_price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    price
}

/// Price of a literal coded with the plain literal coder.
pub fn literal_price(probs: &[u16], symbol: u8) -> u32 {
    let mut price = 0;
    let mut symbol = u32::from(symbol) | 0x100;
    while symbol < 0x10000 {
        price += bit_price(probs[(symbol >> 8) as usize], (symbol >> 7) & 1);
        symbol <<= 1;
    }
    price
}

/// Price of a literal coded against the byte at rep0.
pub fn matched_literal_price(probs: &[u16], symbol: u8, match_byte: u8) -> u32 {
    let mut price = 0;
    let mut offs = 0x100u32;
    let mut symbol = u32::from(symbol) | 0x100;
    let mut match_byte = u32::from(match_byte);
    while symbol < 0x10000 {
        match_byte <<= 1;
        let index = offs + (match_byte & offs) + (symbol >> 8);
        price += bit_price(probs[index as usize], (symbol >> 7) & 1);
        symbol <<= 1;
        offs &= !(match_byte ^ symbol);
    }
    price
}

/// Number of distance slots reachable with a dictionary of `dict_size` bytes.
pub fn dist_table_size(dict_size: u32) -> u32 {
    let mut log = 0;
    while log < 32 && u64::from(dict_size) > 1u64 << log {
        log += 1;
    }
    (log * 2).min(DIST_SLOTS as u32)
}

/// Per-position-state price table for one length coder.
#[derive(Debug, Clone)]
pub struct LengthPrices {
    prices: Vec<[u32; LEN_SYMBOLS]>,
    counters: [u32; POS_STATES_MAX],
    table_size: u32,
}

impl LengthPrices {
    /// Create a table covering lengths `2..=fast_bytes`.
    pub fn new(fast_bytes: u32) -> Self {
        Self {
            prices: vec![[0; LEN_SYMBOLS]; POS_STATES_MAX],
            counters: [0; POS_STATES_MAX],
            table_size: fast_bytes + 1 - MATCH_LEN_MIN,
        }
    }

    /// Cached price of coding `len` in `pos_state`.
    #[inline]
    pub fn price(&self, pos_state: usize, len: u32) -> u32 {
        self.prices[pos_state][(len - MATCH_LEN_MIN) as usize]
    }

    /// Recompute the table of one position state.
    pub fn update(&mut self, probs: &LengthProbs, pos_state: usize) {
        let a0 = price0(probs.choice);
        let a1 = price1(probs.choice);
        let b0 = a1 + price0(probs.choice2);
        let b1 = a1 + price1(probs.choice2);
        let size = self.table_size as usize;
        let row = &mut self.prices[pos_state];

        for (i, slot) in row.iter_mut().enumerate().take(size) {
            *slot = if i < LEN_LOW_SYMBOLS {
                a0 + tree_price(&probs.low[pos_state], LEN_LOW_BITS, i as u32)
            } else if i < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
                let symbol = (i - LEN_LOW_SYMBOLS) as u32;
                b0 + tree_price(&probs.mid[pos_state], LEN_MID_BITS, symbol)
            } else {
                let symbol = (i - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS) as u32;
                b1 + tree_price(&probs.high, LEN_HIGH_BITS, symbol)
            };
        }
        self.counters[pos_state] = self.table_size;
    }

    /// Recompute the tables of the first `num_pos_states` position states.
    pub fn update_all(&mut self, probs: &LengthProbs, num_pos_states: usize) {
        for pos_state in 0..num_pos_states {
            self.update(probs, pos_state);
        }
    }

    /// Count one coded length; refreshes the row once its budget runs out.
    pub fn tick(&mut self, probs: &LengthProbs, pos_state: usize) {
        self.counters[pos_state] = self.counters[pos_state].saturating_sub(1);
        if self.counters[pos_state] == 0 {
            self.update(probs, pos_state);
        }
    }
}

/// Cached prices of distance slots, full distances and alignment bits.
#[derive(Debug, Clone)]
pub struct DistancePrices {
    slots: [[u32; DIST_SLOTS]; LEN_TO_POS_STATES],
    distances: [[u32; FULL_DISTANCES]; LEN_TO_POS_STATES],
    align: [u32; ALIGN_SIZE],
    table_size: u32,
    /// Matches coded since the last distance refresh.
    pub match_count: u32,
    /// Alignment symbols coded since the last alignment refresh.
    pub align_count: u32,
}

impl DistancePrices {
    /// Create empty tables for a dictionary of `dict_size` bytes.
    pub fn new(dict_size: u32) -> Self {
        Self {
            slots: [[0; DIST_SLOTS]; LEN_TO_POS_STATES],
            distances: [[0; FULL_DISTANCES]; LEN_TO_POS_STATES],
            align: [0; ALIGN_SIZE],
            table_size: dist_table_size(dict_size),
            match_count: 0,
            align_count: 0,
        }
    }

    /// Rebuild slot and full-distance prices from the model.
    pub fn fill_distances(&mut self, model: &LzmaModel) {
        let mut footer = [0u32; FULL_DISTANCES];
        for (dist, price) in footer
            .iter_mut()
            .enumerate()
            .skip(START_POS_MODEL_INDEX as usize)
        {
            let dist = dist as u32;
            let slot = dist_slot(dist);
            let footer_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer_bits;
            let probs = &model.pos_special[special_base(slot)..];
            *price = reverse_tree_price(probs, footer_bits, dist - base);
        }

        let table_size = self.table_size as usize;
        for lps in 0..LEN_TO_POS_STATES {
            let encoder = &model.pos_slot[lps];
            let slots = &mut self.slots[lps];
            for (slot, price) in slots.iter_mut().enumerate().take(table_size) {
                *price = tree_price(encoder, POS_SLOT_BITS, slot as u32);
            }
            for (slot, price) in slots
                .iter_mut()
                .enumerate()
                .take(table_size)
                .skip(END_POS_MODEL_INDEX as usize)
            {
                let direct_bits = ((slot as u32) >> 1) - 1 - ALIGN_BITS;
                *price += direct_bits << PRICE_SHIFT_BITS;
            }

            let distances = &mut self.distances[lps];
            for (dist, price) in distances.iter_mut().enumerate() {
                *price = if dist < START_POS_MODEL_INDEX as usize {
                    slots[dist]
                } else {
                    slots[dist_slot(dist as u32) as usize] + footer[dist]
                };
            }
        }
        self.match_count = 0;
    }

    /// Rebuild alignment prices from the model.
    pub fn fill_align(&mut self, model: &LzmaModel) {
        for (symbol, price) in self.align.iter_mut().enumerate() {
            *price = reverse_tree_price(&model.pos_align, ALIGN_BITS, symbol as u32);
        }
        self.align_count = 0;
    }

    /// Price of a zero-based distance under length-to-position state `lps`.
    #[inline]
    pub fn match_price(&self, dist: u32, lps: usize) -> u32 {
        if (dist as usize) < FULL_DISTANCES {
            self.distances[lps][dist as usize]
        } else {
            self.slots[lps][dist_slot(dist) as usize] + self.align[(dist & ALIGN_MASK) as usize]
        }
    }
}

/// All price caches of one encoder session.
#[derive(Debug, Clone)]
pub struct PriceTables {
    /// Match length prices.
    pub len: LengthPrices,
    /// Rep match length prices.
    pub rep_len: LengthPrices,
    /// Distance prices.
    pub dist: DistancePrices,
}

impl PriceTables {
    /// Create tables for the given session geometry.
    pub fn new(fast_bytes: u32, dict_size: u32) -> Self {
        Self {
            len: LengthPrices::new(fast_bytes),
            rep_len: LengthPrices::new(fast_bytes),
            dist: DistancePrices::new(dict_size),
        }
    }

    /// Bring every table in line with the model.
    ///
    /// Distance and alignment prices are only consulted by the optimal
    /// parser, so fast mode skips them.
    pub fn init(&mut self, model: &LzmaModel, fast_mode: bool, num_pos_states: usize) {
        if !fast_mode {
            self.dist.fill_distances(model);
            self.dist.fill_align(model);
        }
        self.len.update_all(&model.match_len, num_pos_states);
        self.rep_len.update_all(&model.rep_len, num_pos_states);
    }

    /// Refresh distance and alignment prices whose budgets ran out.
    pub fn refresh(&mut self, model: &LzmaModel) {
        if self.dist.match_count >= DIST_PRICE_REFRESH {
            self.dist.fill_distances(model);
        }
        if self.dist.align_count >= ALIGN_SIZE as u32 {
            self.dist.fill_align(model);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PROB_INIT;

    #[test]
    fn test_prob_price_table() {
        assert_eq!(PROB_PRICES[0], 128);
        assert_eq!(PROB_PRICES[1], 103);
        assert_eq!(PROB_PRICES[32], 32);
        assert_eq!(PROB_PRICES[63], 17);
        assert_eq!(PROB_PRICES[64], 16);
        assert_eq!(PROB_PRICES[96], 7);
        assert_eq!(PROB_PRICES[127], 1);
        assert!(PROB_PRICES.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_bit_price() {
        assert_eq!(price0(PROB_INIT), 16);
        assert_eq!(price1(PROB_INIT), 17);
        assert_eq!(bit_price(PROB_INIT, 0), price0(PROB_INIT));
        assert_eq!(bit_price(PROB_INIT, 1), price1(PROB_INIT));
        // A confident model makes the expected bit cheap.
        assert!(price0(2000) < price1(2000));
        assert!(price1(40) < price0(40));
    }

    #[test]
    fn test_literal_prices_at_init() {
        let probs = [PROB_INIT; 0x300];
        assert_eq!(literal_price(&probs, 0x00), 8 * 16);
        assert_eq!(literal_price(&probs, 0xFF), 8 * 17);
        assert_eq!(matched_literal_price(&probs, 0x00, 0xFF), 8 * 16);
    }

    #[test]
    fn test_tree_prices() {
        let probs = [PROB_INIT; 64];
        assert_eq!(tree_price(&probs, 6, 0), 6 * 16);
        assert_eq!(tree_price(&probs, 6, 63), 6 * 17);
        assert_eq!(reverse_tree_price(&probs, 4, 0b0001), 17 + 3 * 16);
    }

    #[test]
    fn test_dist_table_size() {
        assert_eq!(dist_table_size(1 << 12), 24);
        assert_eq!(dist_table_size((1 << 12) + 1), 26);
        assert_eq!(dist_table_size(1 << 23), 46);
        assert_eq!(dist_table_size(3 << 29), 62);
    }

    #[test]
    fn test_length_prices_at_init() {
        let probs = LengthProbs::new();
        let mut prices = LengthPrices::new(32);
        prices.update_all(&probs, 4);
        // choice 0 + three low bits.
        assert_eq!(prices.price(0, 2), 16 + 3 * 16);
        // choice 1, choice2 0 + three mid bits.
        assert_eq!(prices.price(3, 10), 17 + 16 + 3 * 16);
        // choice 1, choice2 1 + eight high bits.
        assert_eq!(prices.price(1, 18), 17 + 17 + 8 * 16);
    }

    #[test]
    fn test_length_counter_refresh() {
        let mut probs = LengthProbs::new();
        let mut prices = LengthPrices::new(5);
        prices.update(&probs, 0);
        let before = prices.price(0, 2);
        probs.choice = 2000;
        for _ in 0..3 {
            prices.tick(&probs, 0);
        }
        assert_eq!(prices.price(0, 2), before);
        prices.tick(&probs, 0);
        assert!(prices.price(0, 2) < before);
    }

    #[test]
    fn test_distance_prices_at_init() {
        let model = LzmaModel::new(3, 0).unwrap();
        let mut tables = PriceTables::new(32, 1 << 16);
        tables.init(&model, false, 4);

        assert_eq!(tables.dist.match_price(0, 0), 6 * 16);
        // Slot 4 plus one reverse-coded footer bit.
        assert_eq!(tables.dist.match_price(4, 1), 5 * 16 + 17 + 16);
        assert!(tables.dist.match_price(1000, 3) > tables.dist.match_price(100, 3));
        assert_eq!(tables.dist.match_count, 0);
        assert_eq!(tables.dist.align_count, 0);
    }

    #[test]
    fn test_refresh_waits_for_budgets() {
        let mut model = LzmaModel::new(3, 0).unwrap();
        let mut tables = PriceTables::new(32, 1 << 16);
        tables.init(&model, false, 4);
        let far = tables.dist.match_price(5000, 2);
        let near = tables.dist.match_price(40, 2);
        let align = tables.dist.align;

        for tree in &mut model.pos_slot {
            tree.fill(100);
        }
        model.pos_special.fill(1900);
        model.pos_align.fill(100);

        tables.dist.match_count = DIST_PRICE_REFRESH - 1;
        tables.dist.align_count = ALIGN_SIZE as u32 - 1;
        tables.refresh(&model);
        assert_eq!(tables.dist.match_price(5000, 2), far);
        assert_eq!(tables.dist.match_price(40, 2), near);
        assert_eq!(tables.dist.align, align);
        assert_eq!(tables.dist.match_count, DIST_PRICE_REFRESH - 1);
        assert_eq!(tables.dist.align_count, ALIGN_SIZE as u32 - 1);

        tables.dist.match_count = DIST_PRICE_REFRESH;
        tables.refresh(&model);
        assert_eq!(tables.dist.match_count, 0);
        assert_ne!(tables.dist.match_price(40, 2), near);
        assert_eq!(tables.dist.align, align);
        assert_eq!(tables.dist.align_count, ALIGN_SIZE as u32 - 1);

        tables.dist.align_count = ALIGN_SIZE as u32;
        tables.refresh(&model);
        assert_eq!(tables.dist.align_count, 0);
        assert_ne!(tables.dist.align, align);
        assert_ne!(tables.dist.match_price(5000, 2), far);
    }
}
