use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, LoopRV, Schedule, ScheduleResult, Var};

use crate::context::TuneContext;
use crate::error::{RuleError, RuleResult};
use crate::rule::ScheduleRule;

use super::{ReuseConfig, TilingCore, TilingFilter};

/// The loop bound to the iterator of the innermost written index, and the
/// number of lanes a `bits`-wide vector holds for the written dtype.
pub(crate) fn vector_loop(sch: &Schedule, block: BlockRV, bits: i64) -> Option<(LoopRV, i64)> {
    let node = sch.block(block).ok()?;
    let store = node.store.as_ref()?;
    let Var::Iter(iter) = store.target.indices.last()?.as_var()? else {
        return None;
    };
    let Var::Loop(loop_rv) = node.iter_vars.get(iter)?.binding.as_var()? else {
        return None;
    };
    let dtype_bits = i64::from(sch.func().buffer(store.target.buffer)?.dtype.bits());
    let lanes = bits / dtype_bits;
    (lanes >= 1).then_some((loop_rv, lanes))
}

/// Splits `loop_rv` into `n_tiles` loops whose innermost one spans exactly
/// `lanes` iterations and is vectorized. Loops no longer than a vector keep
/// their whole extent innermost.
pub(crate) fn split_loop(
    sch: &mut Schedule,
    loop_rv: LoopRV,
    n_tiles: usize,
    lanes: i64,
    max_innermost_factor: i64,
) -> ScheduleResult<Vec<LoopRV>> {
    let extent = sch.for_loop(loop_rv)?.extent;
    if extent <= lanes {
        let mut factors = vec![Some(1); n_tiles - 1];
        factors.push(Some(extent));
        return sch.split(loop_rv, &factors);
    }
    let parts = sch.split(loop_rv, &[None, Some(lanes)])?;
    let (outer, inner) = (parts[0], parts[1]);
    let outer_factors = sch.sample_perfect_tile(outer, n_tiles - 1, max_innermost_factor)?;
    let outer_factors: Vec<Option<i64>> = outer_factors.into_iter().map(Some).collect();
    let mut loops = sch.split(outer, &outer_factors)?;
    sch.vectorize(inner)?;
    loops.push(inner);
    Ok(loops)
}

/// Multi-level tiling whose innermost spatial tile is a full hardware vector.
#[derive(Clone)]
pub struct MultiLevelTilingWideVector {
    core: TilingCore,
    vector_length_in_bits: i64,
}

impl MultiLevelTilingWideVector {
    pub fn new(
        structure: &str,
        vector_length_in_bits: i64,
        max_innermost_factor: Option<i64>,
        reuse_read: Option<ReuseConfig>,
        reuse_write: Option<ReuseConfig>,
    ) -> RuleResult<Self> {
        if vector_length_in_bits <= 0 {
            return Err(RuleError::InvalidConfig(format!(
                "vector length must be positive, got {vector_length_in_bits} bits"
            )));
        }
        let mut core = TilingCore::new(
            structure,
            None,
            max_innermost_factor,
            None,
            reuse_read,
            reuse_write,
        )?;
        core.wide_vector_bits = Some(vector_length_in_bits);
        Ok(Self {
            core,
            vector_length_in_bits,
        })
    }

    pub fn with_filter(mut self, filter: TilingFilter) -> Self {
        self.core.filter = Some(filter);
        self
    }
}

impl fmt::Display for MultiLevelTilingWideVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MultiLevelTilingWideVector(vector_length_in_bits={}, ",
            self.vector_length_in_bits
        )?;
        self.core.describe(f)?;
        f.write_str(")")
    }
}

impl ScheduleRule for MultiLevelTilingWideVector {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        self.core.initialize(context, "MultiLevelTilingWideVector")
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
