//! Reference LZMA decoder and test data generators.
//!
//! The decoder keeps its model, rep distances and state between calls to
//! [`Decoder::decode`], so consecutive chunks of a block-streaming session
//! can be fed to it one after another.

#![allow(dead_code)]

const NUM_STATES: usize = 12;
const POS_STATES_MAX: usize = 16;
const PROB_INIT: u16 = 1024;
const END_MARKER_DIST: u32 = 0xFFFF_FFFF;

struct RangeDecoder<'d> {
    data: &'d [u8],
    pos: usize,
    range: u32,
    code: u32,
}

impl<'d> RangeDecoder<'d> {
    fn new(data: &'d [u8]) -> Result<Self, String> {
        if data.len() < 5 {
            return Err("stream shorter than the range coder preamble".into());
        }
        if data[0] != 0 {
            return Err("first range coder byte is not zero".into());
        }
        let code = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        Ok(Self {
            data,
            pos: 5,
            range: 0xFFFF_FFFF,
            code,
        })
    }

    fn normalize(&mut self) -> Result<(), String> {
        if self.range < 1 << 24 {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| String::from("stream truncated"))?;
            self.pos += 1;
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(byte);
        }
        Ok(())
    }

    fn bit(&mut self, prob: &mut u16) -> Result<u32, String> {
        let bound = (self.range >> 11) * u32::from(*prob);
        let bit = if self.code < bound {
            self.range = bound;
            *prob += (2048 - *prob) >> 5;
            0
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> 5;
            1
        };
        self.normalize()?;
        Ok(bit)
    }

    fn direct(&mut self, count: u32) -> Result<u32, String> {
        let mut value = 0;
        for _ in 0..count {
            self.range >>= 1;
            let bit = u32::from(self.code >= self.range);
            if bit == 1 {
                self.code -= self.range;
            }
            value = (value << 1) | bit;
            self.normalize()?;
        }
        Ok(value)
    }

    fn tree(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32, String> {
        let mut m = 1usize;
        for _ in 0..num_bits {
            m = (m << 1) | self.bit(&mut probs[m])? as usize;
        }
        Ok(m as u32 - (1 << num_bits))
    }

    fn reverse_tree(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32, String> {
        let mut m = 1usize;
        let mut value = 0;
        for i in 0..num_bits {
            let bit = self.bit(&mut probs[m])?;
            m = (m << 1) | bit as usize;
            value |= bit << i;
        }
        Ok(value)
    }
}

#[derive(Clone)]
struct LengthModel {
    choice: u16,
    choice2: u16,
    low: [[u16; 8]; POS_STATES_MAX],
    mid: [[u16; 8]; POS_STATES_MAX],
    high: [u16; 256],
}

impl LengthModel {
    fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; 8]; POS_STATES_MAX],
            mid: [[PROB_INIT; 8]; POS_STATES_MAX],
            high: [PROB_INIT; 256],
        }
    }

    fn decode(&mut self, rc: &mut RangeDecoder<'_>, pos_state: usize) -> Result<u32, String> {
        if rc.bit(&mut self.choice)? == 0 {
            Ok(2 + rc.tree(&mut self.low[pos_state], 3)?)
        } else if rc.bit(&mut self.choice2)? == 0 {
            Ok(10 + rc.tree(&mut self.mid[pos_state], 3)?)
        } else {
            Ok(18 + rc.tree(&mut self.high, 8)?)
        }
    }
}

/// Literal context, literal position and position bits from a header byte.
pub fn split_properties(byte: u8) -> (u32, u32, u32) {
    let byte = u32::from(byte);
    (byte % 9, (byte / 9) % 5, byte / 45)
}

/// Stateful LZMA decoder. The output vector doubles as the dictionary.
pub struct Decoder {
    lc: u32,
    lp: u32,
    pb: u32,
    literal: Vec<u16>,
    is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    is_rep: [u16; NUM_STATES],
    is_rep_g0: [u16; NUM_STATES],
    is_rep_g1: [u16; NUM_STATES],
    is_rep_g2: [u16; NUM_STATES],
    is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],
    slot: [[u16; 64]; 4],
    special: [[u16; 32]; 14],
    align: [u16; 16],
    match_len: LengthModel,
    rep_len: LengthModel,
    state: usize,
    reps: [u32; 4],
    /// Everything decoded so far.
    pub output: Vec<u8>,
}

impl Decoder {
    /// Decoder for the given properties header byte.
    pub fn new(properties: u8) -> Self {
        let (lc, lp, pb) = split_properties(properties);
        Self {
            lc,
            lp,
            pb,
            literal: vec![PROB_INIT; 0x300 << (lc + lp)],
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            slot: [[PROB_INIT; 64]; 4],
            special: [[PROB_INIT; 32]; 14],
            align: [PROB_INIT; 16],
            match_len: LengthModel::new(),
            rep_len: LengthModel::new(),
            state: 0,
            reps: [0; 4],
            output: Vec::new(),
        }
    }

    /// Return the model, rep distances and state to their initial values.
    /// Decoded output is kept.
    pub fn reset_state(&mut self) {
        let output = std::mem::take(&mut self.output);
        let header = ((self.pb * 5 + self.lp) * 9 + self.lc) as u8;
        *self = Self::new(header);
        self.output = output;
    }

    /// Decode one range coder stream.
    ///
    /// With `size` set, exactly that many bytes are decoded; otherwise the
    /// stream must end with an end marker. Returns whether a marker was seen.
    pub fn decode(&mut self, stream: &[u8], size: Option<usize>) -> Result<bool, String> {
        let mut rc = RangeDecoder::new(stream)?;
        let target = size.map(|n| self.output.len() + n);
        let pb_mask = (1usize << self.pb) - 1;
        let lp_mask = (1usize << self.lp) - 1;

        loop {
            if Some(self.output.len()) == target {
                return Ok(false);
            }
            let pos = self.output.len();
            let pos_state = pos & pb_mask;
            let s = self.state;

            if rc.bit(&mut self.is_match[s][pos_state])? == 0 {
                let prev = self.output.last().copied().unwrap_or(0);
                let context = ((pos & lp_mask) << self.lc) + (usize::from(prev) >> (8 - self.lc));
                let match_byte = if s >= 7 {
                    Some(usize::from(self.byte_at(self.reps[0])?))
                } else {
                    None
                };
                let probs = &mut self.literal[context * 0x300..(context + 1) * 0x300];
                let mut symbol = 1usize;
                if let Some(mut match_byte) = match_byte {
                    while symbol < 0x100 {
                        let match_bit = (match_byte >> 7) & 1;
                        match_byte <<= 1;
                        let bit = rc.bit(&mut probs[0x100 + (match_bit << 8) + symbol])? as usize;
                        symbol = (symbol << 1) | bit;
                        if bit != match_bit {
                            break;
                        }
                    }
                }
                while symbol < 0x100 {
                    symbol = (symbol << 1) | rc.bit(&mut probs[symbol])? as usize;
                }
                self.output.push((symbol - 0x100) as u8);
                self.state = match s {
                    0..=3 => 0,
                    4..=9 => s - 3,
                    _ => s - 6,
                };
                continue;
            }

            let len;
            if rc.bit(&mut self.is_rep[s])? == 0 {
                len = self.match_len.decode(&mut rc, pos_state)?;
                let dist = self.decode_distance(&mut rc, len)?;
                if dist == END_MARKER_DIST {
                    return if target.is_none() {
                        Ok(true)
                    } else {
                        Err("end marker inside a sized stream".into())
                    };
                }
                self.reps = [dist, self.reps[0], self.reps[1], self.reps[2]];
                self.state = if s < 7 { 7 } else { 10 };
            } else {
                if rc.bit(&mut self.is_rep_g0[s])? == 0 {
                    if rc.bit(&mut self.is_rep0_long[s][pos_state])? == 0 {
                        let byte = self.byte_at(self.reps[0])?;
                        self.output.push(byte);
                        self.state = if s < 7 { 9 } else { 11 };
                        continue;
                    }
                } else {
                    let index = if rc.bit(&mut self.is_rep_g1[s])? == 0 {
                        1
                    } else if rc.bit(&mut self.is_rep_g2[s])? == 0 {
                        2
                    } else {
                        3
                    };
                    let dist = self.reps[index];
                    self.reps.copy_within(0..index, 1);
                    self.reps[0] = dist;
                }
                len = self.rep_len.decode(&mut rc, pos_state)?;
                self.state = if s < 7 { 8 } else { 11 };
            }

            for _ in 0..len {
                if Some(self.output.len()) == target {
                    return Err("match runs past the declared size".into());
                }
                let byte = self.byte_at(self.reps[0])?;
                self.output.push(byte);
            }
        }
    }

    fn byte_at(&self, dist: u32) -> Result<u8, String> {
        let back = dist as usize + 1;
        if back > self.output.len() {
            return Err(format!(
                "distance {back} reaches before the start of {} decoded bytes",
                self.output.len()
            ));
        }
        Ok(self.output[self.output.len() - back])
    }

    fn decode_distance(&mut self, rc: &mut RangeDecoder<'_>, len: u32) -> Result<u32, String> {
        let lps = (len - 2).min(3) as usize;
        let slot = rc.tree(&mut self.slot[lps], 6)?;
        if slot < 4 {
            return Ok(slot);
        }
        let footer_bits = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << footer_bits;
        if slot < 14 {
            Ok(base + rc.reverse_tree(&mut self.special[slot as usize], footer_bits)?)
        } else {
            let direct = rc.direct(footer_bits - 4)?;
            let align = rc.reverse_tree(&mut self.align, 4)?;
            Ok(base.wrapping_add(direct << 4).wrapping_add(align))
        }
    }
}

/// Decode a complete stream.
pub fn decode(header: &[u8; 5], stream: &[u8], size: Option<usize>) -> Result<Vec<u8>, String> {
    let mut decoder = Decoder::new(header[0]);
    decoder.decode(stream, size)?;
    Ok(decoder.output)
}

/// Deterministic pseudo-random bytes from a 64-bit LCG.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 56) as u8
        })
        .collect()
}

/// Word salad with plenty of medium-range repeats.
pub fn text_bytes(len: usize) -> Vec<u8> {
    const WORDS: [&[u8]; 12] = [
        b"the ", b"firmware ", b"volume ", b"header ", b"section ", b"guid ",
        b"capsule ", b"image ", b"driver ", b"protocol ", b"table\n", b"boot ",
    ];
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(WORDS[(state % WORDS.len() as u64) as usize]);
    }
    out.truncate(len);
    out
}

/// Structured binary: repeated records with small mutations and random
/// filler, so that rep distances and long matches both occur.
pub fn binary_bytes(len: usize) -> Vec<u8> {
    let noise = random_bytes(len, 99);
    let record: Vec<u8> = (0u8..48).map(|i| i.wrapping_mul(37)).collect();
    let mut out = Vec::with_capacity(len);
    let mut i = 0;
    while out.len() < len {
        if noise[i % noise.len()] < 40 {
            out.extend_from_slice(&noise[i % noise.len()..(i % noise.len() + 17).min(noise.len())]);
        } else {
            out.extend_from_slice(&record);
            let at = out.len() - 1 - (i % 48);
            out[at] ^= noise[i % noise.len()];
        }
        i += 1;
    }
    out.truncate(len);
    out
}
