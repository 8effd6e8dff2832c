//! Encoder session.
//!
//! [`LzmaEncoder`] ties the match finder, the parser, the probability model
//! and the range coder together. Input is consumed in blocks of about 32K
//! positions; between blocks the caller's [`Progress`] hook may stop the
//! session. Read and write failures are latched where they happen and
//! reported at the next block boundary.

use crate::match_finder::{self, FinderConfig, MatchFinder};
use crate::model::{
    ALIGN_BITS, ALIGN_MASK, END_POS_MODEL_INDEX, LengthProbs, LzmaModel, MATCH_LEN_MIN,
    POS_SLOT_BITS, RepDistances, START_POS_MODEL_INDEX, State, dist_slot, len_to_pos_state,
    special_base,
};
use crate::optimal::{Decision, NUM_OPTS, OptimalParser, ParseContext};
use crate::price::{LengthPrices, PriceTables};
use crate::props::{EncoderConfig, EncoderProps, PROPS_SIZE};
use crate::range_coder::RangeEncoder;
use lzpack_core::error::{LzError, Result};
use lzpack_core::io::SliceSink;
use lzpack_core::traits::{NoProgress, Progress};
use std::io::{Read, Write};
use tracing::{debug, trace, warn};

/// Positions coded per block in streaming mode.
const BLOCK_POSITIONS: u32 = 1 << 15;

/// Bounds of one chunk in block-streaming mode.
#[derive(Debug, Clone, Copy)]
struct BlockLimits {
    max_pack: u64,
    max_unpack: u64,
}

/// Result of [`LzmaEncoder::encode_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutput {
    /// Compressed bytes written to the destination.
    pub packed: usize,
    /// Input bytes the chunk covers.
    pub unpacked: u32,
}

/// Coder state captured by [`LzmaEncoder::save_state`].
#[derive(Debug, Clone)]
struct Snapshot {
    model: LzmaModel,
    prices: PriceTables,
    reps: RepDistances,
    state: State,
}

/// A single-use LZMA encoding session.
pub struct LzmaEncoder<'a> {
    config: EncoderConfig,
    finder: Box<dyn MatchFinder + 'a>,
    parser: OptimalParser,
    rc: RangeEncoder<'a>,
    model: LzmaModel,
    prices: PriceTables,
    reps: RepDistances,
    state: State,
    pb_mask: u32,
    snapshot: Option<Snapshot>,
    now_pos: u64,
    need_init: bool,
    finished: bool,
    result: Option<LzError>,
    write_end_marker: bool,
}

impl std::fmt::Debug for LzmaEncoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaEncoder")
            .field("config", &self.config)
            .field("now_pos", &self.now_pos)
            .field("state", &self.state)
            .field("reps", &self.reps)
            .field("finished", &self.finished)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl<'a> LzmaEncoder<'a> {
    /// Create a session reading from `input` and writing the raw stream to
    /// `output`.
    ///
    /// Properties are validated and every table is allocated up front; no
    /// input is read until the first block is coded.
    pub fn new(props: &EncoderProps, input: impl Read + 'a, output: impl Write + 'a) -> Result<Self> {
        let config = props.normalize()?;
        Self::with_finder(config, FinderConfig::from_config(&config), input, output)
    }

    /// Create a session with explicit match finder geometry.
    pub fn with_finder(
        config: EncoderConfig,
        finder_config: FinderConfig,
        input: impl Read + 'a,
        output: impl Write + 'a,
    ) -> Result<Self> {
        debug!(
            level = config.level,
            dict_size = config.dict_size,
            lc = config.lc,
            lp = config.lp,
            pb = config.pb,
            fast_mode = config.fast_mode,
            binary_tree = config.binary_tree,
            hash_bytes = finder_config.hash_bytes,
            fast_bytes = config.fast_bytes,
            cycles = config.cycles,
            "creating encoder session"
        );
        let finder = match_finder::create(input, finder_config)?;
        let model = LzmaModel::new(config.lc, config.lp)?;
        let mut prices = PriceTables::new(config.fast_bytes, config.dict_size);
        prices.init(&model, config.fast_mode, config.num_pos_states());
        let rc = RangeEncoder::new(output)?;

        Ok(Self {
            config,
            finder,
            parser: OptimalParser::new(config.fast_bytes),
            rc,
            model,
            prices,
            reps: RepDistances::default(),
            state: State::new(),
            pb_mask: (1 << config.pb) - 1,
            snapshot: None,
            now_pos: 0,
            need_init: true,
            finished: false,
            result: None,
            write_end_marker: config.write_end_marker,
        })
    }

    /// Resolved session settings.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// The 5-byte properties header describing this stream.
    pub fn write_properties(&self) -> [u8; PROPS_SIZE] {
        self.config.properties()
    }

    /// Input bytes coded so far.
    pub fn bytes_in(&self) -> u64 {
        self.now_pos
    }

    /// Compressed bytes produced so far.
    ///
    /// While the session runs this counts bytes still held by the range
    /// coder; once finished it is the exact stream length.
    pub fn bytes_out(&self) -> u64 {
        if self.finished {
            self.rc.emitted()
        } else {
            self.rc.processed()
        }
    }

    /// Whether the stream has been flushed or the session failed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Code the whole input.
    ///
    /// `progress` is called after every block with the input and output
    /// byte counts; breaking stops the session with [`LzError::Aborted`].
    pub fn encode(&mut self, progress: &mut dyn Progress) -> Result<()> {
        loop {
            self.code_one_block(None)?;
            if self.finished {
                return Ok(());
            }
            if progress.report(self.now_pos, self.rc.processed()).is_break() {
                warn!(bytes_in = self.now_pos, "encoding aborted by progress callback");
                return Err(LzError::Aborted);
            }
        }
    }

    /// Code one bounded chunk into `dest` without an end marker.
    ///
    /// The chunk stops once about `desired_pack_size` compressed bytes or
    /// `max_unpack_size` input bytes are reached. Each chunk is a complete
    /// range coder stream; the model carries over unless `reinit` is set.
    /// Output goes through an internal buffer, so a session used this way
    /// no longer writes to its stream sink.
    pub fn encode_chunk(
        &mut self,
        dest: &mut [u8],
        desired_pack_size: usize,
        max_unpack_size: u32,
        reinit: bool,
    ) -> Result<ChunkOutput> {
        self.write_end_marker = false;
        self.finished = false;
        self.result = None;

        if reinit {
            self.reset_model();
        }
        self.prices
            .init(&self.model, self.config.fast_mode, self.config.num_pos_states());
        let start = self.now_pos;
        self.rc.reset();
        self.rc.use_memory_sink();

        let limits = BlockLimits {
            max_pack: desired_pack_size as u64,
            max_unpack: u64::from(max_unpack_size),
        };
        let outcome = self.code_one_block(Some(limits));

        let unpacked = (self.now_pos - start) as u32;
        let data = self.rc.take_memory();
        let packed = data.len().min(dest.len());
        dest[..packed].copy_from_slice(&data[..packed]);
        if data.len() > dest.len() {
            return Err(LzError::output_exhausted(packed));
        }
        outcome?;
        trace!(packed, unpacked, "chunk coded");
        Ok(ChunkOutput { packed, unpacked })
    }

    /// Remember the model, rep distances and state.
    pub fn save_state(&mut self) {
        self.snapshot = Some(Snapshot {
            model: self.model.clone(),
            prices: self.prices.clone(),
            reps: self.reps,
            state: self.state,
        });
    }

    /// Return to the state remembered by [`save_state`](Self::save_state).
    ///
    /// Does nothing if no state was saved.
    pub fn restore_state(&mut self) {
        if let Some(snapshot) = &self.snapshot {
            self.model.clone_from(&snapshot.model);
            self.prices.clone_from(&snapshot.prices);
            self.reps = snapshot.reps;
            self.state = snapshot.state;
        }
    }

    fn reset_model(&mut self) {
        self.model.reset();
        self.reps = RepDistances::default();
        self.state = State::new();
        self.parser.reset();
    }

    fn status(&self) -> Result<()> {
        match &self.result {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Latch any I/O failure; a read failure takes precedence.
    fn check_errors(&mut self) -> Result<()> {
        if self.result.is_some() {
            return self.status();
        }
        if let Some(err) = self.rc.failure() {
            self.result = Some(err.clone());
        }
        if let Some(err) = self.finder.failure() {
            self.result = Some(err.clone());
        }
        if self.result.is_some() {
            self.finished = true;
        }
        self.status()
    }

    fn flush(&mut self, position: u32) -> Result<()> {
        self.finished = true;
        if self.write_end_marker {
            self.encode_end_marker((position & self.pb_mask) as usize);
        }
        self.rc.flush_data();
        self.rc.flush_stream();
        self.rc.flush_sink();
        let outcome = self.check_errors();
        debug!(
            bytes_in = self.now_pos,
            bytes_out = self.rc.emitted(),
            ok = outcome.is_ok(),
            "encoder session finished"
        );
        outcome
    }

    fn code_one_block(&mut self, limits: Option<BlockLimits>) -> Result<()> {
        if self.need_init {
            self.finder.init();
            self.need_init = false;
        }
        if self.finished {
            return self.status();
        }
        self.check_errors()?;

        let mut position = self.now_pos as u32;
        let start = position;

        if self.now_pos == 0 {
            if self.finder.available() == 0 {
                return self.flush(position);
            }
            self.parser.read_match_distances(self.finder.as_mut());
            self.rc
                .encode_bit(&mut self.model.is_match[self.state.value()][0], 0);
            self.state = self.state.after_literal();
            let byte = self
                .finder
                .view()
                .shift(-(self.parser.additional_offset as isize))
                .byte(0);
            self.rc.encode_literal(self.model.literal_probs_mut(0, 0), byte);
            self.parser.additional_offset -= 1;
            position += 1;
        }

        if self.finder.available() != 0 {
            loop {
                let (len, back) = if self.config.fast_mode {
                    self.parser
                        .get_optimum_fast(self.finder.as_mut(), &self.reps)
                } else {
                    let ctx = ParseContext {
                        model: &self.model,
                        prices: &self.prices,
                        reps: self.reps,
                        state: self.state,
                        pb_mask: self.pb_mask,
                    };
                    self.parser
                        .get_optimum(self.finder.as_mut(), &ctx, position)
                };

                self.encode_decision(Decision::from_code(len, back), position);
                self.parser.additional_offset -= len;
                position = position.wrapping_add(len);

                if self.parser.additional_offset == 0 {
                    if !self.config.fast_mode {
                        self.prices.refresh(&self.model);
                    }
                    if self.finder.available() == 0 {
                        break;
                    }
                    let processed = position.wrapping_sub(start);
                    match limits {
                        Some(limits) => {
                            if u64::from(processed) + NUM_OPTS as u64 + 300 >= limits.max_unpack
                                || self.rc.processed() + NUM_OPTS as u64 * 2 >= limits.max_pack
                            {
                                break;
                            }
                        }
                        None if processed >= BLOCK_POSITIONS => {
                            self.now_pos += u64::from(processed);
                            trace!(
                                bytes_in = self.now_pos,
                                bytes_out = self.rc.processed(),
                                "block coded"
                            );
                            return self.check_errors();
                        }
                        None => {}
                    }
                }
            }
        }

        self.now_pos += u64::from(position.wrapping_sub(start));
        self.flush(position)
    }

    fn encode_decision(&mut self, decision: Decision, position: u32) {
        let pos_state = (position & self.pb_mask) as usize;
        let s = self.state.value();
        let fast_mode = self.config.fast_mode;

        match decision {
            Decision::Literal => {
                self.rc.encode_bit(&mut self.model.is_match[s][pos_state], 0);
                let view = self
                    .finder
                    .view()
                    .shift(-(self.parser.additional_offset as isize));
                let byte = view.byte(0);
                let match_byte = view.back(self.reps.get(0), 0);
                let probs = self.model.literal_probs_mut(position, view.prev());
                if self.state.is_literal() {
                    self.rc.encode_literal(probs, byte);
                } else {
                    self.rc.encode_matched_literal(probs, byte, match_byte);
                }
                self.state = self.state.after_literal();
            }
            Decision::ShortRep | Decision::Rep { .. } => {
                let (index, len) = match decision {
                    Decision::Rep { index, len } => (index, len),
                    _ => (0, 1),
                };
                self.rc.encode_bit(&mut self.model.is_match[s][pos_state], 1);
                self.rc.encode_bit(&mut self.model.is_rep[s], 1);
                if index == 0 {
                    self.rc.encode_bit(&mut self.model.is_rep_g0[s], 0);
                    self.rc.encode_bit(
                        &mut self.model.is_rep0_long[s][pos_state],
                        u32::from(len != 1),
                    );
                } else {
                    self.rc.encode_bit(&mut self.model.is_rep_g0[s], 1);
                    if index == 1 {
                        self.rc.encode_bit(&mut self.model.is_rep_g1[s], 0);
                    } else {
                        self.rc.encode_bit(&mut self.model.is_rep_g1[s], 1);
                        self.rc.encode_bit(&mut self.model.is_rep_g2[s], index - 2);
                    }
                    self.reps.promote(index as usize);
                }
                if len == 1 {
                    self.state = self.state.after_short_rep();
                } else {
                    encode_length(
                        &mut self.rc,
                        &mut self.model.rep_len,
                        &mut self.prices.rep_len,
                        len,
                        pos_state,
                        !fast_mode,
                    );
                    self.state = self.state.after_rep();
                }
            }
            Decision::Match { dist, len } => {
                self.rc.encode_bit(&mut self.model.is_match[s][pos_state], 1);
                self.rc.encode_bit(&mut self.model.is_rep[s], 0);
                self.state = self.state.after_match();
                encode_length(
                    &mut self.rc,
                    &mut self.model.match_len,
                    &mut self.prices.len,
                    len,
                    pos_state,
                    !fast_mode,
                );
                self.encode_distance(dist, len);
                self.reps.push(dist);
                self.prices.dist.match_count += 1;
            }
        }
    }

    fn encode_distance(&mut self, dist: u32, len: u32) {
        let slot = dist_slot(dist);
        self.rc.encode_tree(
            &mut self.model.pos_slot[len_to_pos_state(len)],
            POS_SLOT_BITS,
            slot,
        );
        if slot < START_POS_MODEL_INDEX {
            return;
        }
        let footer_bits = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << footer_bits;
        let reduced = dist - base;
        if slot < END_POS_MODEL_INDEX {
            self.rc.encode_reverse_tree(
                &mut self.model.pos_special[special_base(slot)..],
                footer_bits,
                reduced,
            );
        } else {
            self.rc
                .encode_direct_bits(reduced >> ALIGN_BITS, footer_bits - ALIGN_BITS);
            self.rc
                .encode_reverse_tree(&mut self.model.pos_align, ALIGN_BITS, reduced & ALIGN_MASK);
            self.prices.dist.align_count += 1;
        }
    }

    /// Code the end-of-stream marker: a match with the all-ones distance.
    fn encode_end_marker(&mut self, pos_state: usize) {
        let s = self.state.value();
        self.rc.encode_bit(&mut self.model.is_match[s][pos_state], 1);
        self.rc.encode_bit(&mut self.model.is_rep[s], 0);
        self.state = self.state.after_match();
        encode_length(
            &mut self.rc,
            &mut self.model.match_len,
            &mut self.prices.len,
            MATCH_LEN_MIN,
            pos_state,
            !self.config.fast_mode,
        );
        self.rc.encode_tree(
            &mut self.model.pos_slot[0],
            POS_SLOT_BITS,
            (1 << POS_SLOT_BITS) - 1,
        );
        self.rc
            .encode_direct_bits(((1 << 30) - 1) >> ALIGN_BITS, 30 - ALIGN_BITS);
        self.rc
            .encode_reverse_tree(&mut self.model.pos_align, ALIGN_BITS, ALIGN_MASK);
    }
}

/// Code a match length and count it against the cached prices.
fn encode_length(
    rc: &mut RangeEncoder<'_>,
    probs: &mut LengthProbs,
    prices: &mut LengthPrices,
    len: u32,
    pos_state: usize,
    update_prices: bool,
) {
    let symbol = len - MATCH_LEN_MIN;
    if symbol < 8 {
        rc.encode_bit(&mut probs.choice, 0);
        rc.encode_tree(&mut probs.low[pos_state], 3, symbol);
    } else if symbol < 16 {
        rc.encode_bit(&mut probs.choice, 1);
        rc.encode_bit(&mut probs.choice2, 0);
        rc.encode_tree(&mut probs.mid[pos_state], 3, symbol - 8);
    } else {
        rc.encode_bit(&mut probs.choice, 1);
        rc.encode_bit(&mut probs.choice2, 1);
        rc.encode_tree(&mut probs.high, 8, symbol - 16);
    }
    if update_prices {
        prices.tick(probs, pos_state);
    }
}

/// Encode `src` into `dest` in one call.
///
/// Returns the number of bytes written and the properties header. If the
/// stream does not fit, [`LzError::OutputExhausted`] reports how many bytes
/// were written before the buffer ran out; nothing is written past its end.
pub fn encode_to_slice(
    dest: &mut [u8],
    src: &[u8],
    props: &EncoderProps,
    progress: &mut dyn Progress,
) -> Result<(usize, [u8; PROPS_SIZE])> {
    let mut sink = SliceSink::new(dest);
    let (outcome, header) = {
        let mut encoder = LzmaEncoder::new(props, src, &mut sink)?;
        let header = encoder.write_properties();
        (encoder.encode(progress), header)
    };
    if sink.overflowed() {
        return Err(LzError::output_exhausted(sink.written()));
    }
    outcome?;
    Ok((sink.written(), header))
}

/// Encode `src` into a new vector. Returns the raw stream and the
/// properties header.
pub fn compress_to_vec(src: &[u8], props: &EncoderProps) -> Result<(Vec<u8>, [u8; PROPS_SIZE])> {
    let mut out = Vec::new();
    let header = {
        let mut encoder = LzmaEncoder::new(props, src, &mut out)?;
        encoder.encode(&mut NoProgress)?;
        encoder.write_properties()
    };
    Ok((out, header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ALIGN_SIZE;
    use crate::price::DIST_PRICE_REFRESH;
    use crate::props::Algorithm;

    fn small_props() -> EncoderProps {
        EncoderProps::with_level(5).dict_size(1 << 16)
    }

    fn text(len: usize) -> Vec<u8> {
        let words: [&[u8]; 6] = [b"alpha ", b"beta ", b"gamma ", b"delta\n", b"epsilon ", b"pi "];
        let mut state = 7u64;
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            out.extend_from_slice(words[(state >> 33) as usize % words.len()]);
        }
        out.truncate(len);
        out
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 32) as u8
            })
            .collect()
    }

    #[test]
    fn test_empty_input() {
        let (out, header) = compress_to_vec(&[], &small_props()).unwrap();
        assert_eq!(out, vec![0u8; 5]);
        assert_eq!(header[0], 93);
    }

    #[test]
    fn test_counters() {
        let data = text(100_000);
        let mut out = Vec::new();
        let mut encoder = LzmaEncoder::new(&small_props(), &data[..], &mut out).unwrap();
        assert!(!encoder.is_finished());
        encoder.encode(&mut NoProgress).unwrap();
        assert!(encoder.is_finished());
        assert_eq!(encoder.bytes_in(), data.len() as u64);
        let written = encoder.bytes_out();
        drop(encoder);
        assert_eq!(written, out.len() as u64);
    }

    #[test]
    fn test_progress_sees_blocks() {
        let data = text(200_000);
        let mut out = Vec::new();
        let mut reports = Vec::new();
        let mut progress = |input: u64, output: u64| {
            reports.push((input, output));
            std::ops::ControlFlow::Continue(())
        };
        let mut encoder = LzmaEncoder::new(&small_props(), &data[..], &mut out).unwrap();
        encoder.encode(&mut progress).unwrap();
        assert!(reports.len() >= 5);
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_save_and_restore_state() {
        // Incompressible input, so the second chunk codes literals.
        let data = noise(50_000);
        let props = small_props();
        let mut encoder = LzmaEncoder::new(&props, &data[..], std::io::sink()).unwrap();
        let mut dest = vec![0u8; 1 << 16];
        encoder.encode_chunk(&mut dest, 1 << 15, 1 << 14, true).unwrap();

        encoder.save_state();
        let literal = encoder.model.literal.clone();
        let is_match = encoder.model.is_match;
        let reps = encoder.reps;
        let state = encoder.state;

        encoder.encode_chunk(&mut dest, 1 << 15, 1 << 14, false).unwrap();
        assert_ne!(encoder.model.literal, literal);

        encoder.restore_state();
        assert_eq!(encoder.model.literal, literal);
        assert_eq!(encoder.model.is_match, is_match);
        assert_eq!(encoder.reps, reps);
        assert_eq!(encoder.state, state);
    }

    #[test]
    fn test_restore_without_save_is_noop() {
        let data = text(1000);
        let mut encoder = LzmaEncoder::new(&small_props(), &data[..], std::io::sink()).unwrap();
        encoder.restore_state();
        assert_eq!(encoder.state, State::new());
        assert_eq!(encoder.reps, RepDistances::default());
    }

    #[test]
    fn test_chunk_respects_unpack_limit() {
        let data = text(100_000);
        let mut encoder = LzmaEncoder::new(&small_props(), &data[..], std::io::sink()).unwrap();
        let mut dest = vec![0u8; 1 << 17];
        let chunk = encoder.encode_chunk(&mut dest, 1 << 16, 1 << 15, true).unwrap();
        assert!(chunk.unpacked > 0);
        assert!(chunk.unpacked <= 1 << 15);
        assert!(chunk.packed > 5);
        assert_eq!(encoder.bytes_in(), u64::from(chunk.unpacked));
    }

    #[test]
    fn test_fast_mode_skips_price_refresh() {
        let data = text(20_000);
        let props = small_props().algorithm(Algorithm::Fast);
        let mut encoder = LzmaEncoder::new(&props, &data[..], std::io::sink()).unwrap();
        encoder.encode(&mut NoProgress).unwrap();
        assert!(encoder.config().fast_mode);
        assert!(encoder.prices.dist.match_count >= DIST_PRICE_REFRESH);
        assert!(encoder.prices.dist.align_count >= ALIGN_SIZE as u32);
    }

    #[test]
    fn test_normal_mode_refreshes_prices() {
        let data = text(20_000);
        let mut encoder = LzmaEncoder::new(&small_props(), &data[..], std::io::sink()).unwrap();
        encoder.encode(&mut NoProgress).unwrap();
        assert!(!encoder.config().fast_mode);
        assert!(encoder.prices.dist.match_count < DIST_PRICE_REFRESH);
        assert!(encoder.prices.dist.align_count < ALIGN_SIZE as u32);
    }
}
