//! Parsing: choosing the next literal or match to code.
//!
//! Two parsers share the match finder plumbing here. The optimal parser runs
//! a price-driven shortest path over up to 4 KiB of look-ahead and replays
//! the winning path one step per call. The fast parser decides greedily from
//! the current and the next position.
//!
//! Every position whose matches have been read but not yet coded is counted
//! in [`OptimalParser::additional_offset`]; the encoder subtracts the length
//! of each decision it codes.

use crate::match_finder::{MatchFinder, MatchPair};
use crate::model::{
    LzmaModel, MATCH_LEN_MAX, NUM_REPS, RepDistances, State, len_to_pos_state,
};
use crate::price::{
    INFINITY_PRICE, PriceTables, bit_price, literal_price, matched_literal_price, price0, price1,
};
use std::collections::VecDeque;

/// Back code of a literal.
pub const LITERAL: u32 = u32::MAX;

/// Look-ahead cells of the optimal parser.
pub const NUM_OPTS: usize = 1 << 12;

const REPS: u32 = NUM_REPS as u32;

/// One coding step picked by a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A single literal byte.
    Literal,
    /// One byte repeated from rep0.
    ShortRep,
    /// `len` bytes from the rep distance at `index`.
    Rep {
        /// Rep slot, 0..=3.
        index: u32,
        /// Match length.
        len: u32,
    },
    /// `len` bytes from a new zero-based distance.
    Match {
        /// Distance minus one.
        dist: u32,
        /// Match length.
        len: u32,
    },
}

impl Decision {
    /// Decode a `(len, back)` pair as produced by the parsers.
    pub fn from_code(len: u32, back: u32) -> Self {
        match back {
            LITERAL => Self::Literal,
            0 if len == 1 => Self::ShortRep,
            index if index < REPS => Self::Rep { index, len },
            _ => Self::Match {
                dist: back - REPS,
                len,
            },
        }
    }

    /// Bytes covered by this step.
    pub fn len(&self) -> u32 {
        match *self {
            Self::Literal | Self::ShortRep => 1,
            Self::Rep { len, .. } | Self::Match { len, .. } => len,
        }
    }
}

/// Coder state the optimal parser prices against.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'m> {
    /// Current probabilities.
    pub model: &'m LzmaModel,
    /// Price caches matching `model`.
    pub prices: &'m PriceTables,
    /// Rep distances before the step.
    pub reps: RepDistances,
    /// Coder state before the step.
    pub state: State,
    /// Mask selecting the position state bits.
    pub pb_mask: u32,
}

impl ParseContext<'_> {
    fn rep_len1_price(&self, state: State, pos_state: usize) -> u32 {
        let s = state.value();
        price0(self.model.is_rep_g0[s]) + price0(self.model.is_rep0_long[s][pos_state])
    }

    fn pure_rep_price(&self, index: u32, state: State, pos_state: usize) -> u32 {
        let model = self.model;
        let s = state.value();
        match index {
            0 => price0(model.is_rep_g0[s]) + price1(model.is_rep0_long[s][pos_state]),
            1 => price1(model.is_rep_g0[s]) + price0(model.is_rep_g1[s]),
            _ => {
                price1(model.is_rep_g0[s])
                    + price1(model.is_rep_g1[s])
                    + bit_price(model.is_rep_g2[s], index - 2)
            }
        }
    }

    fn rep_price(&self, index: u32, len: u32, state: State, pos_state: usize) -> u32 {
        self.prices.rep_len.price(pos_state, len) + self.pure_rep_price(index, state, pos_state)
    }
}

/// Shortest-path cell.
#[derive(Debug, Clone, Copy, Default)]
struct Node {
    price: u32,
    state: State,
    prev1_is_char: bool,
    prev2: bool,
    pos_prev2: u32,
    back_prev2: u32,
    pos_prev: u32,
    back_prev: u32,
    backs: [u32; NUM_REPS],
}

impl Node {
    fn make_literal(&mut self) {
        self.back_prev = LITERAL;
        self.prev1_is_char = false;
    }

    fn make_short_rep(&mut self) {
        self.back_prev = 0;
        self.prev1_is_char = false;
    }

    fn is_short_rep(&self) -> bool {
        self.back_prev == 0
    }

    /// Offer a path reaching this cell by one step from `pos_prev`.
    fn offer(&mut self, price: u32, pos_prev: u32, back: u32) {
        if price < self.price {
            self.price = price;
            self.pos_prev = pos_prev;
            self.back_prev = back;
            self.prev1_is_char = false;
        }
    }
}

/// Parser state carried between calls.
#[derive(Debug)]
pub struct OptimalParser {
    nodes: Vec<Node>,
    pending: VecDeque<(u32, u32)>,
    steps: Vec<(u32, u32)>,
    matches: Vec<MatchPair>,
    longest_match_len: u32,
    num_avail: u32,
    fast_bytes: u32,
    /// Positions read from the finder but not coded yet.
    pub additional_offset: u32,
}

impl OptimalParser {
    /// Create a parser that accepts matches of `fast_bytes` immediately.
    pub fn new(fast_bytes: u32) -> Self {
        Self {
            nodes: vec![Node::default(); NUM_OPTS],
            pending: VecDeque::new(),
            steps: Vec::new(),
            matches: Vec::with_capacity(MATCH_LEN_MAX as usize * 2 + 2),
            longest_match_len: 0,
            num_avail: 0,
            fast_bytes,
            additional_offset: 0,
        }
    }

    /// Drop any queued path and look-ahead bookkeeping.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.matches.clear();
        self.longest_match_len = 0;
        self.num_avail = 0;
        self.additional_offset = 0;
    }

    /// Read the matches at the finder position and advance it one byte.
    ///
    /// Returns the longest match length, extended past the finder limit when
    /// it hit `fast_bytes`.
    pub fn read_match_distances(&mut self, finder: &mut dyn MatchFinder) -> u32 {
        self.num_avail = finder.available();
        finder.get_matches(&mut self.matches);
        let mut len = 0;
        if let Some(last) = self.matches.last() {
            len = last.len;
            if len == self.fast_bytes {
                let limit = self.num_avail.min(MATCH_LEN_MAX) as usize;
                len = finder
                    .view()
                    .shift(-1)
                    .match_len(last.dist, len as usize, limit) as u32;
            }
        }
        self.additional_offset += 1;
        len
    }

    fn move_pos(&mut self, finder: &mut dyn MatchFinder, num: u32) {
        if num != 0 {
            self.additional_offset += num;
            finder.skip(num);
        }
    }

    /// Pick the next step with the optimal parser. Returns `(len, back)`.
    ///
    /// `position` is the stream offset of the byte to code.
    pub fn get_optimum(
        &mut self,
        finder: &mut dyn MatchFinder,
        ctx: &ParseContext<'_>,
        mut position: u32,
    ) -> (u32, u32) {
        if let Some(step) = self.pending.pop_front() {
            return step;
        }

        let main_len = if self.additional_offset == 0 {
            self.read_match_distances(finder)
        } else {
            self.longest_match_len
        };

        if self.num_avail < 2 {
            return (1, LITERAL);
        }
        let num_avail = self.num_avail.min(MATCH_LEN_MAX) as usize;
        let fast_bytes = self.fast_bytes;
        let model = ctx.model;
        let prices = ctx.prices;
        let pb_mask = ctx.pb_mask;
        let reps = ctx.reps.0;

        let view = finder.view().shift(-1);
        let mut rep_lens = [0u32; NUM_REPS];
        let mut rep_max_index = 0;
        for i in 0..NUM_REPS {
            if !view.starts_match(reps[i]) {
                continue;
            }
            rep_lens[i] = view.match_len(reps[i], 2, num_avail) as u32;
            if rep_lens[i] > rep_lens[rep_max_index] {
                rep_max_index = i;
            }
        }

        if rep_lens[rep_max_index] >= fast_bytes {
            let len = rep_lens[rep_max_index];
            self.move_pos(finder, len - 1);
            return (len, rep_max_index as u32);
        }
        if main_len >= fast_bytes {
            let back = self.matches[self.matches.len() - 1].dist + REPS;
            self.move_pos(finder, main_len - 1);
            return (main_len, back);
        }

        let cur_byte = view.byte(0);
        let match_byte = view.back(reps[0], 0);
        if main_len < 2 && cur_byte != match_byte && rep_lens[rep_max_index] < 2 {
            return (1, LITERAL);
        }

        let state = ctx.state;
        let s = state.value();
        let pos_state = (position & pb_mask) as usize;
        self.nodes[0].state = state;

        let probs = model.literal_probs(position, view.prev());
        let literal = if state.is_literal() {
            literal_price(probs, cur_byte)
        } else {
            matched_literal_price(probs, cur_byte, match_byte)
        };
        self.nodes[1].price = price0(model.is_match[s][pos_state]) + literal;
        self.nodes[1].make_literal();

        let match_price = price1(model.is_match[s][pos_state]);
        let rep_match_price = match_price + price1(model.is_rep[s]);

        if match_byte == cur_byte {
            let short_rep_price = rep_match_price + ctx.rep_len1_price(state, pos_state);
            if short_rep_price < self.nodes[1].price {
                self.nodes[1].price = short_rep_price;
                self.nodes[1].make_short_rep();
            }
        }

        let mut len_end = main_len.max(rep_lens[rep_max_index]) as usize;
        if len_end < 2 {
            return (1, self.nodes[1].back_prev);
        }

        self.nodes[1].pos_prev = 0;
        self.nodes[0].backs = reps;

        for node in &mut self.nodes[2..=len_end] {
            node.price = INFINITY_PRICE;
        }

        for (i, &rep_len) in rep_lens.iter().enumerate() {
            if rep_len < 2 {
                continue;
            }
            let price = rep_match_price + ctx.pure_rep_price(i as u32, state, pos_state);
            for len in (2..=rep_len).rev() {
                let cand = price + prices.rep_len.price(pos_state, len);
                self.nodes[len as usize].offer(cand, 0, i as u32);
            }
        }

        let normal_match_price = match_price + price0(model.is_rep[s]);
        let mut len = if rep_lens[0] >= 2 { rep_lens[0] + 1 } else { 2 };
        if len <= main_len {
            let mut offs = 0;
            while len > self.matches[offs].len {
                offs += 1;
            }
            loop {
                let dist = self.matches[offs].dist;
                let cand = normal_match_price
                    + prices.len.price(pos_state, len)
                    + prices.dist.match_price(dist, len_to_pos_state(len));
                self.nodes[len as usize].offer(cand, 0, dist + REPS);
                if len == self.matches[offs].len {
                    offs += 1;
                    if offs == self.matches.len() {
                        break;
                    }
                }
                len += 1;
            }
        }

        let mut cur = 0usize;
        loop {
            cur += 1;
            if cur == len_end {
                return self.backward(cur);
            }

            let mut new_len = self.read_match_distances(finder);
            if new_len >= fast_bytes {
                self.longest_match_len = new_len;
                return self.backward(cur);
            }
            position = position.wrapping_add(1);

            let cur_node = self.nodes[cur];
            let mut pos_prev = cur_node.pos_prev as usize;
            let mut state;
            if cur_node.prev1_is_char {
                pos_prev -= 1;
                if cur_node.prev2 {
                    state = self.nodes[cur_node.pos_prev2 as usize].state;
                    state = if cur_node.back_prev2 < REPS {
                        state.after_rep()
                    } else {
                        state.after_match()
                    };
                } else {
                    state = self.nodes[pos_prev].state;
                }
                state = state.after_literal();
            } else {
                state = self.nodes[pos_prev].state;
            }

            let reps = if pos_prev == cur - 1 {
                state = if cur_node.is_short_rep() {
                    state.after_short_rep()
                } else {
                    state.after_literal()
                };
                self.nodes[cur - 1].backs
            } else {
                let back;
                if cur_node.prev1_is_char && cur_node.prev2 {
                    pos_prev = cur_node.pos_prev2 as usize;
                    back = cur_node.back_prev2;
                    state = state.after_rep();
                } else {
                    back = cur_node.back_prev;
                    state = if back < REPS {
                        state.after_rep()
                    } else {
                        state.after_match()
                    };
                }
                let mut reps = RepDistances(self.nodes[pos_prev].backs);
                reps.apply(back);
                reps.0
            };
            self.nodes[cur].state = state;
            self.nodes[cur].backs = reps;

            let s = state.value();
            let cur_price = cur_node.price;
            let view = finder.view().shift(-1);
            let cur_byte = view.byte(0);
            let match_byte = view.back(reps[0], 0);
            let pos_state = (position & pb_mask) as usize;
            let next = cur + 1;

            let probs = model.literal_probs(position, view.prev());
            let literal = if state.is_literal() {
                literal_price(probs, cur_byte)
            } else {
                matched_literal_price(probs, cur_byte, match_byte)
            };
            let cur_and1_price = cur_price + price0(model.is_match[s][pos_state]) + literal;

            let mut next_is_char = false;
            if cur_and1_price < self.nodes[next].price {
                let node = &mut self.nodes[next];
                node.price = cur_and1_price;
                node.pos_prev = cur as u32;
                node.make_literal();
                next_is_char = true;
            }

            let match_price = cur_price + price1(model.is_match[s][pos_state]);
            let rep_match_price = match_price + price1(model.is_rep[s]);

            let next_node = self.nodes[next];
            if match_byte == cur_byte
                && !((next_node.pos_prev as usize) < cur && next_node.back_prev == 0)
            {
                let short_rep_price = rep_match_price + ctx.rep_len1_price(state, pos_state);
                if short_rep_price <= next_node.price {
                    let node = &mut self.nodes[next];
                    node.price = short_rep_price;
                    node.pos_prev = cur as u32;
                    node.make_short_rep();
                    next_is_char = true;
                }
            }

            let num_avail_full = (self.num_avail as usize).min(NUM_OPTS - 1 - cur);
            if num_avail_full < 2 {
                continue;
            }
            let num_avail = num_avail_full.min(fast_bytes as usize);

            if !next_is_char && match_byte != cur_byte {
                // literal followed by rep0
                let limit = (fast_bytes as usize + 1).min(num_avail_full);
                let len_test2 = view.match_len(reps[0], 1, limit) - 1;
                if len_test2 >= 2 {
                    let state2 = state.after_literal();
                    let pos_state_next = (position.wrapping_add(1) & pb_mask) as usize;
                    let next_rep_match_price = cur_and1_price
                        + price1(model.is_match[state2.value()][pos_state_next])
                        + price1(model.is_rep[state2.value()]);
                    let offset = cur + 1 + len_test2;
                    self.extend(&mut len_end, offset);
                    let cand = next_rep_match_price
                        + ctx.rep_price(0, len_test2 as u32, state2, pos_state_next);
                    let node = &mut self.nodes[offset];
                    if cand < node.price {
                        node.price = cand;
                        node.pos_prev = next as u32;
                        node.back_prev = 0;
                        node.prev1_is_char = true;
                        node.prev2 = false;
                    }
                }
            }

            let mut start_len = 2u32;
            for rep_index in 0..NUM_REPS {
                let rep = reps[rep_index];
                if !view.starts_match(rep) {
                    continue;
                }
                let len_test = view.match_len(rep, 2, num_avail);
                self.extend(&mut len_end, cur + len_test);
                let price = rep_match_price + ctx.pure_rep_price(rep_index as u32, state, pos_state);
                for len in (2..=len_test).rev() {
                    let cand = price + prices.rep_len.price(pos_state, len as u32);
                    self.nodes[cur + len].offer(cand, cur as u32, rep_index as u32);
                }

                if rep_index == 0 {
                    start_len = len_test as u32 + 1;
                }

                // rep, literal, rep0
                let limit = (len_test + 1 + fast_bytes as usize).min(num_avail_full);
                let len_test2 = view.match_len(rep, len_test + 1, limit) - (len_test + 1);
                if len_test2 >= 2 {
                    let rep_end = position.wrapping_add(len_test as u32);
                    let mut state2 = state.after_rep();
                    let mut pos_state_next = (rep_end & pb_mask) as usize;
                    let cur_and_len_char_price = price
                        + prices.rep_len.price(pos_state, len_test as u32)
                        + price0(model.is_match[state2.value()][pos_state_next])
                        + matched_literal_price(
                            model.literal_probs(rep_end, view.byte(len_test - 1)),
                            view.byte(len_test),
                            view.back(rep, len_test),
                        );
                    state2 = state2.after_literal();
                    pos_state_next = (rep_end.wrapping_add(1) & pb_mask) as usize;
                    let next_rep_match_price = cur_and_len_char_price
                        + price1(model.is_match[state2.value()][pos_state_next])
                        + price1(model.is_rep[state2.value()]);
                    let offset = cur + len_test + 1 + len_test2;
                    self.extend(&mut len_end, offset);
                    let cand = next_rep_match_price
                        + ctx.rep_price(0, len_test2 as u32, state2, pos_state_next);
                    let node = &mut self.nodes[offset];
                    if cand < node.price {
                        node.price = cand;
                        node.pos_prev = (cur + len_test + 1) as u32;
                        node.back_prev = 0;
                        node.prev1_is_char = true;
                        node.prev2 = true;
                        node.pos_prev2 = cur as u32;
                        node.back_prev2 = rep_index as u32;
                    }
                }
            }

            if new_len as usize > num_avail {
                new_len = num_avail as u32;
                let mut n = 0;
                while new_len > self.matches[n].len {
                    n += 1;
                }
                self.matches[n].len = new_len;
                self.matches.truncate(n + 1);
            }

            if new_len >= start_len {
                let normal_match_price = match_price + price0(model.is_rep[s]);
                self.extend(&mut len_end, cur + new_len as usize);

                let mut offs = 0;
                while start_len > self.matches[offs].len {
                    offs += 1;
                }
                let mut cur_back = self.matches[offs].dist;
                let mut len_test = start_len;
                loop {
                    let cur_and_len_price = normal_match_price
                        + prices.len.price(pos_state, len_test)
                        + prices.dist.match_price(cur_back, len_to_pos_state(len_test));
                    self.nodes[cur + len_test as usize].offer(
                        cur_and_len_price,
                        cur as u32,
                        cur_back + REPS,
                    );

                    if len_test == self.matches[offs].len {
                        // match, literal, rep0
                        let lt = len_test as usize;
                        let limit = (lt + 1 + fast_bytes as usize).min(num_avail_full);
                        let len_test2 = view.match_len(cur_back, lt + 1, limit) - (lt + 1);
                        if len_test2 >= 2 {
                            let match_end = position.wrapping_add(len_test);
                            let mut state2 = state.after_match();
                            let mut pos_state_next = (match_end & pb_mask) as usize;
                            let cur_and_len_char_price = cur_and_len_price
                                + price0(model.is_match[state2.value()][pos_state_next])
                                + matched_literal_price(
                                    model.literal_probs(match_end, view.byte(lt - 1)),
                                    view.byte(lt),
                                    view.back(cur_back, lt),
                                );
                            state2 = state2.after_literal();
                            pos_state_next = (match_end.wrapping_add(1) & pb_mask) as usize;
                            let next_rep_match_price = cur_and_len_char_price
                                + price1(model.is_match[state2.value()][pos_state_next])
                                + price1(model.is_rep[state2.value()]);
                            let offset = cur + lt + 1 + len_test2;
                            self.extend(&mut len_end, offset);
                            let cand = next_rep_match_price
                                + ctx.rep_price(0, len_test2 as u32, state2, pos_state_next);
                            let node = &mut self.nodes[offset];
                            if cand < node.price {
                                node.price = cand;
                                node.pos_prev = (cur + lt + 1) as u32;
                                node.back_prev = 0;
                                node.prev1_is_char = true;
                                node.prev2 = true;
                                node.pos_prev2 = cur as u32;
                                node.back_prev2 = cur_back + REPS;
                            }
                        }
                        offs += 1;
                        if offs == self.matches.len() {
                            break;
                        }
                        cur_back = self.matches[offs].dist;
                    }
                    len_test += 1;
                }
            }
        }
    }

    /// Grow the explored range to `end`, marking new cells unreachable.
    fn extend(&mut self, len_end: &mut usize, end: usize) {
        while *len_end < end {
            *len_end += 1;
            self.nodes[*len_end].price = INFINITY_PRICE;
        }
    }

    /// Walk the best path back from `end`, queue its steps and return the
    /// first one.
    fn backward(&mut self, end: usize) -> (u32, u32) {
        self.steps.clear();
        let mut idx = end as u32;
        while idx != 0 {
            let node = self.nodes[idx as usize];
            self.steps.push((idx - node.pos_prev, node.back_prev));
            if node.prev1_is_char {
                self.steps.push((1, LITERAL));
                let literal_at = node.pos_prev - 1;
                if node.prev2 {
                    self.steps
                        .push((literal_at - node.pos_prev2, node.back_prev2));
                    idx = node.pos_prev2;
                } else {
                    idx = literal_at;
                }
            } else {
                idx = node.pos_prev;
            }
        }
        self.pending.extend(self.steps.drain(..).rev());
        self.pending.pop_front().unwrap_or((1, LITERAL))
    }

    /// Pick the next step with the fast parser. Returns `(len, back)`.
    pub fn get_optimum_fast(
        &mut self,
        finder: &mut dyn MatchFinder,
        reps: &RepDistances,
    ) -> (u32, u32) {
        let mut main_len = if self.additional_offset == 0 {
            self.read_match_distances(finder)
        } else {
            self.longest_match_len
        };
        let mut num_pairs = self.matches.len();

        if self.num_avail < 2 {
            return (1, LITERAL);
        }
        let num_avail = self.num_avail.min(MATCH_LEN_MAX) as usize;
        let fast_bytes = self.fast_bytes;

        let view = finder.view().shift(-1);
        let mut rep_len = 0u32;
        let mut rep_index = 0u32;
        for i in 0..NUM_REPS {
            let rep = reps.get(i);
            if !view.starts_match(rep) {
                continue;
            }
            let len = view.match_len(rep, 2, num_avail) as u32;
            if len >= fast_bytes {
                self.move_pos(finder, len - 1);
                return (len, i as u32);
            }
            if len > rep_len {
                rep_index = i as u32;
                rep_len = len;
            }
        }

        if main_len >= fast_bytes {
            let back = self.matches[num_pairs - 1].dist + REPS;
            self.move_pos(finder, main_len - 1);
            return (main_len, back);
        }

        let mut main_dist = 0;
        if main_len >= 2 {
            main_dist = self.matches[num_pairs - 1].dist;
            while num_pairs > 1 && main_len == self.matches[num_pairs - 2].len + 1 {
                if !change_pair(self.matches[num_pairs - 2].dist, main_dist) {
                    break;
                }
                num_pairs -= 1;
                main_len = self.matches[num_pairs - 1].len;
                main_dist = self.matches[num_pairs - 1].dist;
            }
            if main_len == 2 && main_dist >= 0x80 {
                main_len = 1;
            }
        }

        if rep_len >= 2
            && (rep_len + 1 >= main_len
                || (rep_len + 2 >= main_len && main_dist >= 1 << 9)
                || (rep_len + 3 >= main_len && main_dist >= 1 << 15))
        {
            self.move_pos(finder, rep_len - 1);
            return (rep_len, rep_index);
        }

        if main_len < 2 || num_avail <= 2 {
            return (1, LITERAL);
        }

        self.longest_match_len = self.read_match_distances(finder);
        let next_len = self.longest_match_len;
        if next_len >= 2 {
            let new_dist = self.matches[self.matches.len() - 1].dist;
            if (next_len >= main_len && new_dist < main_dist)
                || (next_len == main_len + 1 && !change_pair(main_dist, new_dist))
                || next_len > main_len + 1
                || (next_len + 1 >= main_len
                    && main_len >= 3
                    && change_pair(new_dist, main_dist))
            {
                return (1, LITERAL);
            }
        }

        let view = finder.view().shift(-1);
        let limit = (main_len - 1) as usize;
        for i in 0..NUM_REPS {
            let rep = reps.get(i);
            if !view.starts_match(rep) {
                continue;
            }
            if view.match_len(rep, 2, limit) >= limit {
                return (1, LITERAL);
            }
        }

        self.move_pos(finder, main_len - 2);
        (main_len, main_dist + REPS)
    }
}

/// Whether `big` is so much farther than `small` that a shorter match at
/// `small` is preferable.
fn change_pair(small: u32, big: u32) -> bool {
    (big >> 7) > small
}
