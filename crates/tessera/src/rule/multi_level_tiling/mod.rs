//! Multi-level tiling and its intrinsic-aware variants.
//!
//! A tiling structure such as `"SSRSRS"` lists tile levels outermost first:
//! every spatial loop of the block is split into as many tiles as there are
//! `S` letters, every reduction loop into as many as there are `R` letters,
//! and the tiles are then reordered level by level. Cache stages for reads
//! and writes are attached under chosen tile levels.

mod reuse;
mod tensor_core;
mod wide_vector;
mod with_intrin;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tessera_tir::{BlockRV, IterKind, LoopRV, Schedule, ScheduleError, ScheduleResult};

use crate::attr;
use crate::context::TuneContext;
use crate::error::{RuleError, RuleResult};

use super::analysis::{needs_multi_level_tiling, sample_uniform};
use super::{mark_initialized, ScheduleRule};

pub use reuse::{ReuseConfig, ReuseType};
pub use tensor_core::{IntrinGroup, MultiLevelTilingTensorCore};
pub use wide_vector::MultiLevelTilingWideVector;
pub use with_intrin::MultiLevelTilingWithIntrin;

/// Caller-supplied block predicate for the tiling rules.
pub type TilingFilter = Arc<dyn Fn(&Schedule, BlockRV) -> bool + Send + Sync>;

type Tile = SmallVec<[LoopRV; 4]>;

/// One partially built variant.
pub(crate) struct State {
    sch: Schedule,
    block: BlockRV,
    /// Loops of each tile level, in structure order.
    tiles: Vec<Tile>,
    /// Cache-read blocks keyed by read index.
    read_reuse: BTreeMap<usize, BlockRV>,
    write_reuse: Option<BlockRV>,
    /// Innermost loops already mapped onto a tensor intrinsic.
    reserved: usize,
}

impl State {
    fn new(sch: Schedule, block: BlockRV) -> Self {
        Self {
            sch,
            block,
            tiles: Vec::new(),
            read_reuse: BTreeMap::new(),
            write_reuse: None,
            reserved: 0,
        }
    }

    fn fork(&mut self) -> State {
        State {
            sch: self.sch.fork(),
            block: self.block,
            tiles: self.tiles.clone(),
            read_reuse: self.read_reuse.clone(),
            write_reuse: self.write_reuse,
            reserved: self.reserved,
        }
    }

    fn tile_loop(&self, level: usize) -> ScheduleResult<LoopRV> {
        level
            .checked_sub(1)
            .and_then(|index| self.tiles.get(index))
            .and_then(|tile| tile.last().copied())
            .ok_or_else(|| ScheduleError::malformed(format!("tile level {level} has no loop")))
    }
}

fn parse_structure(structure: &str) -> RuleResult<(Vec<usize>, Vec<usize>)> {
    if structure.is_empty() {
        return Err(RuleError::invalid_structure(structure, "structure is empty"));
    }
    let mut s_indices = Vec::new();
    let mut r_indices = Vec::new();
    for (i, letter) in structure.chars().enumerate() {
        match letter {
            'S' => s_indices.push(i),
            'R' => r_indices.push(i),
            other => {
                return Err(RuleError::invalid_structure(
                    structure,
                    format!("unexpected letter `{other}`"),
                ))
            }
        }
    }
    if s_indices.is_empty() {
        return Err(RuleError::invalid_structure(structure, "no spatial level"));
    }
    Ok((s_indices, r_indices))
}

fn sub_rule<F>(states: Vec<State>, stage: &str, mut apply: F) -> Vec<State>
where
    F: FnMut(State) -> ScheduleResult<Vec<State>>,
{
    let mut out = Vec::with_capacity(states.len());
    for state in states {
        match apply(state) {
            Ok(next) => out.extend(next),
            Err(err) => log::debug!("multi-level tiling: {stage} failed: {err}"),
        }
    }
    out
}

/// Runs `build` on a fork of `state`, keeping the fork only on success.
fn try_state<F>(state: &mut State, stage: &str, build: F) -> Option<State>
where
    F: FnOnce(&mut State) -> ScheduleResult<()>,
{
    let mut variant = state.fork();
    match build(&mut variant) {
        Ok(()) => Some(variant),
        Err(err) => {
            log::debug!("multi-level tiling: {stage} failed: {err}");
            None
        }
    }
}

/// Configuration and sub-rules shared by every tiling rule.
#[derive(Clone)]
pub(crate) struct TilingCore {
    structure: String,
    s_indices: Vec<usize>,
    r_indices: Vec<usize>,
    tile_binds: Vec<String>,
    /// Non-positive means unbounded.
    max_innermost_factor: i64,
    vector_load_lens: Vec<i64>,
    reuse_read: ReuseConfig,
    reuse_write: ReuseConfig,
    filter: Option<TilingFilter>,
    /// Fixed vector width for the loop feeding the innermost output index.
    wide_vector_bits: Option<i64>,
    max_threads_per_block: Option<i64>,
    thread_warp_size: Option<i64>,
    initialized: bool,
}

impl TilingCore {
    fn new(
        structure: &str,
        tile_binds: Option<&[&str]>,
        max_innermost_factor: Option<i64>,
        vector_load_lens: Option<&[i64]>,
        reuse_read: Option<ReuseConfig>,
        reuse_write: Option<ReuseConfig>,
    ) -> RuleResult<Self> {
        let (s_indices, r_indices) = parse_structure(structure)?;
        let reuse_read = reuse_read.unwrap_or_default();
        let reuse_write = reuse_write.unwrap_or_default();
        if reuse_read.req == ReuseType::May {
            return Err(RuleError::InvalidReuse(
                "read reuse must be either `no` or `must`".to_string(),
            ));
        }
        reuse_read.check_levels(structure.len())?;
        reuse_write.check_levels(structure.len())?;
        let vector_load_lens = vector_load_lens.unwrap_or_default().to_vec();
        if let Some(len) = vector_load_lens.iter().find(|len| **len <= 0) {
            return Err(RuleError::InvalidConfig(format!(
                "vector load length must be positive, got {len}"
            )));
        }
        Ok(Self {
            structure: structure.to_string(),
            s_indices,
            r_indices,
            tile_binds: tile_binds
                .unwrap_or_default()
                .iter()
                .map(|axis| axis.to_string())
                .collect(),
            max_innermost_factor: max_innermost_factor.unwrap_or(-1),
            vector_load_lens,
            reuse_read,
            reuse_write,
            filter: None,
            wide_vector_bits: None,
            max_threads_per_block: None,
            thread_warp_size: None,
            initialized: false,
        })
    }

    fn initialize(&mut self, context: &TuneContext, rule: &str) -> RuleResult<()> {
        mark_initialized(&mut self.initialized, rule)?;
        if let Some(target) = &context.target {
            self.max_threads_per_block = target.max_threads_per_block;
            if self.max_threads_per_block.is_some() {
                self.thread_warp_size = target.thread_warp_size;
            }
        }
        Ok(())
    }

    /// The caller filter when present, the built-in predicate otherwise.
    fn is_eligible(&self, sch: &Schedule, block: BlockRV) -> bool {
        match &self.filter {
            Some(filter) => filter(sch, block),
            None => needs_multi_level_tiling(sch, block),
        }
    }

    /// The built-in predicate, further narrowed by the caller filter.
    fn is_eligible_narrowed(&self, sch: &Schedule, block: BlockRV) -> bool {
        needs_multi_level_tiling(sch, block)
            && self.filter.as_ref().map_or(true, |keep| keep(sch, block))
    }

    /// Forks `sch` and marks the block as tiled on the fork.
    fn start(&self, sch: &mut Schedule, block: BlockRV) -> Option<State> {
        let mut state = State::new(sch.fork(), block);
        match state
            .sch
            .annotate_block(block, attr::TILING_STRUCTURE, self.structure.as_str())
        {
            Ok(()) => Some(state),
            Err(err) => {
                log::debug!("multi-level tiling: cannot annotate {block}: {err}");
                None
            }
        }
    }

    fn apply_sub_rules(&self, states: Vec<State>) -> Vec<State> {
        let states = sub_rule(states, "tiling", |state| self.tile_loop_nest(state));
        let states = sub_rule(states, "write reuse", |state| self.add_write_reuse(state));
        sub_rule(states, "read reuse", |state| self.add_read_reuse(state))
    }

    fn split_loop(
        &self,
        sch: &mut Schedule,
        loop_rv: LoopRV,
        n_tiles: usize,
    ) -> ScheduleResult<Vec<LoopRV>> {
        let factors = sch.sample_perfect_tile(loop_rv, n_tiles, self.max_innermost_factor)?;
        let factors: Vec<Option<i64>> = factors.into_iter().map(Some).collect();
        sch.split(loop_rv, &factors)
    }

    fn tile_loop_nest(&self, mut state: State) -> ScheduleResult<Vec<State>> {
        let block = state.block;
        let sch = &mut state.sch;
        let loops = sch.get_loops(block)?;
        let outer = loops.len().saturating_sub(state.reserved);
        let vector_loop = self
            .wide_vector_bits
            .and_then(|bits| wide_vector::vector_loop(sch, block, bits));

        let max_innermost = self.max_innermost_factor;
        let mut tiles: Vec<Tile> = vec![Tile::new(); self.structure.len()];
        for loop_rv in &loops[..outer] {
            let slots = match sch.loop_iter_type(block, *loop_rv)? {
                Some(IterKind::Spatial) => &self.s_indices,
                Some(IterKind::Reduce) => &self.r_indices,
                None => continue,
            };
            if let [slot] = slots.as_slice() {
                tiles[*slot].push(*loop_rv);
                continue;
            }
            if slots.is_empty() {
                continue;
            }
            let splits = match vector_loop {
                Some((vector, lanes)) if vector == *loop_rv => {
                    wide_vector::split_loop(sch, *loop_rv, slots.len(), lanes, max_innermost)?
                }
                _ => self.split_loop(sch, *loop_rv, slots.len())?,
            };
            for (slot, split) in slots.iter().zip(splits) {
                tiles[*slot].push(split);
            }
        }
        let order: Vec<LoopRV> = tiles.iter().flatten().copied().collect();
        sch.reorder(&order)?;

        let n_binds = self.tile_binds.len().min(tiles.len());
        for (tile, axis) in tiles.iter_mut().zip(&self.tile_binds).take(n_binds) {
            if tile.is_empty() {
                continue;
            }
            let fused = sch.fuse(tile.as_slice())?;
            sch.bind(fused, axis)?;
            *tile = Tile::from_slice(&[fused]);
        }
        if n_binds > 0 {
            if let Some(high) = self.max_threads_per_block {
                let low = self.thread_warp_size.unwrap_or(1);
                sch.annotate_block(block, attr::THREAD_EXTENT_LOW_INCLUSIVE, low)?;
                sch.annotate_block(block, attr::THREAD_EXTENT_HIGH_INCLUSIVE, high)?;
            }
        }
        state.tiles = tiles;
        Ok(vec![state])
    }

    fn add_write_reuse(&self, mut state: State) -> ScheduleResult<Vec<State>> {
        let mut req = self.reuse_write.req;
        let mut levels = self.reuse_write.levels.clone();
        if let Some(forced) = state
            .sch
            .block_annotation(state.block, attr::WRITE_CACHE_LEVEL)
            .and_then(|value| value.as_ints())
        {
            req = ReuseType::Must;
            levels = forced.iter().map(|level| *level as usize).collect();
        }
        if req == ReuseType::No {
            return Ok(vec![state]);
        }

        let mut results = Vec::new();
        if req == ReuseType::May {
            // An elementwise consumer already acts as the write cache.
            let consumers = state.sch.get_consumers(state.block)?;
            if let [consumer] = consumers.as_slice() {
                if state.sch.is_write_cache(*consumer)? {
                    let consumer = *consumer;
                    for level in &levels {
                        results.extend(try_state(&mut state, "write reuse", |variant| {
                            let loop_rv = variant.tile_loop(*level)?;
                            variant.sch.reverse_compute_at(consumer, loop_rv)
                        }));
                    }
                    state.write_reuse = Some(consumer);
                    results.push(state);
                    return Ok(results);
                }
            }
            results.push(state.fork());
        }

        let scope = &self.reuse_write.scope;
        let cache = match state.sch.cache_write(state.block, 0, scope) {
            Ok(cache) => cache,
            Err(err) => {
                log::debug!("multi-level tiling: cache_write failed: {err}");
                return Ok(results);
            }
        };
        state.write_reuse = Some(cache);
        for level in &levels {
            results.extend(try_state(&mut state, "write reuse", |variant| {
                let loop_rv = variant.tile_loop(*level)?;
                variant.sch.reverse_compute_at(cache, loop_rv)
            }));
        }
        Ok(results)
    }

    fn add_read_reuse(&self, mut state: State) -> ScheduleResult<Vec<State>> {
        if self.reuse_read.req == ReuseType::No {
            return Ok(vec![state]);
        }
        let mut results = Vec::with_capacity(self.reuse_read.levels.len());
        for level in &self.reuse_read.levels {
            results.extend(try_state(&mut state, "read reuse", |variant| {
                let loop_rv = variant.tile_loop(*level)?;
                self.cache_reads_at(variant, loop_rv)
            }));
        }
        Ok(results)
    }

    /// Stages every buffer the block only reads, computed under `loop_rv`.
    fn cache_reads_at(&self, state: &mut State, loop_rv: LoopRV) -> ScheduleResult<()> {
        let block = state.block;
        let node = state.sch.block(block)?;
        let written = node.write_buffer();
        let reads = node.read_buffers();
        let ndims = state.sch.read_buffer_ndims(block)?;
        for (index, (buffer, ndim)) in reads.into_iter().zip(ndims).enumerate() {
            if Some(buffer) == written {
                continue;
            }
            let sch = &mut state.sch;
            let cache = sch.cache_read(block, index, &self.reuse_read.scope, &[block])?;
            sch.compute_at(cache, loop_rv)?;
            if ndim > 0 {
                let loops = sch.get_loops(cache)?;
                sch.fuse(&loops[loops.len().saturating_sub(ndim)..])?;
            }
            if !self.vector_load_lens.is_empty() {
                let len = sample_uniform(sch, &self.vector_load_lens)?;
                sch.annotate_block(cache, attr::COOPERATIVE_FETCH, len)?;
            }
            state.read_reuse.insert(index, cache);
        }
        Ok(())
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "structure={}, tile_binds={:?}, max_innermost_factor={}",
            self.structure, self.tile_binds, self.max_innermost_factor
        )?;
        if !self.vector_load_lens.is_empty() {
            write!(f, ", vector_load_lens={:?}", self.vector_load_lens)?;
        }
        let (read, write) = (&self.reuse_read, &self.reuse_write);
        write!(f, ", reuse_read={read}, reuse_write={write}")
    }
}

/// Tiles blocks that reuse their inputs according to a tiling structure.
#[derive(Clone)]
pub struct MultiLevelTiling {
    core: TilingCore,
}

impl MultiLevelTiling {
    /// `None` or an empty list disables the corresponding feature; a
    /// `max_innermost_factor` of `None` or `-1` leaves the innermost tile
    /// unbounded.
    pub fn new(
        structure: &str,
        tile_binds: Option<&[&str]>,
        max_innermost_factor: Option<i64>,
        vector_load_lens: Option<&[i64]>,
        reuse_read: Option<ReuseConfig>,
        reuse_write: Option<ReuseConfig>,
    ) -> RuleResult<Self> {
        Ok(Self {
            core: TilingCore::new(
                structure,
                tile_binds,
                max_innermost_factor,
                vector_load_lens,
                reuse_read,
                reuse_write,
            )?,
        })
    }

    /// Replaces the built-in eligibility check with `filter`.
    pub fn with_filter(mut self, filter: TilingFilter) -> Self {
        self.core.filter = Some(filter);
        self
    }

    pub fn structure(&self) -> &str {
        &self.core.structure
    }
}

impl fmt::Display for MultiLevelTiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MultiLevelTiling(")?;
        self.core.describe(f)?;
        f.write_str(")")
    }
}

impl ScheduleRule for MultiLevelTiling {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        self.core.initialize(context, "MultiLevelTiling")
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        if !self.core.is_eligible(sch, block) {
            return Vec::new();
        }
        let Some(state) = self.core.start(sch, block) else {
            return Vec::new();
        };
        self.core
            .apply_sub_rules(vec![state])
            .into_iter()
            .map(|state| state.sch)
            .collect()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::parse_structure;

    #[test]
    fn structure_letters_become_levels() {
        let (s, r) = parse_structure("SSRSRS").expect("valid structure");
        assert_eq!(s, vec![0, 1, 3, 5]);
        assert_eq!(r, vec![2, 4]);
        assert!(parse_structure("").is_err());
        assert!(parse_structure("RR").is_err());
        assert!(parse_structure("SXR").is_err());
    }
}
