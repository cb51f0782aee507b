use std::any::Any;
use std::fmt;

use tessera_tir::intrin::get_intrin;
use tessera_tir::{BlockRV, LoopRV, Schedule, ScheduleResult};

use crate::attr;
use crate::context::TuneContext;
use crate::error::RuleResult;
use crate::rule::ScheduleRule;

use super::{ReuseConfig, State, TilingCore, TilingFilter};

/// Splits every loop in `mapping` by the intrinsic extent, moves the inner
/// parts innermost and tensorizes them. The inner loops are then reserved
/// from further tiling.
pub(crate) fn tile_for_intrin(
    state: &mut State,
    mapping: &[(LoopRV, i64)],
    intrin_name: &str,
) -> ScheduleResult<()> {
    let sch = &mut state.sch;
    let mut inner = Vec::with_capacity(mapping.len());
    for (loop_rv, extent) in mapping {
        let parts = sch.split(*loop_rv, &[None, Some(*extent)])?;
        inner.extend(parts.last().copied());
    }
    let mut order: Vec<LoopRV> = sch
        .get_loops(state.block)?
        .into_iter()
        .filter(|loop_rv| !inner.contains(loop_rv))
        .collect();
    order.extend_from_slice(&inner);
    sch.reorder(&order)?;
    if let Some(first) = inner.first() {
        sch.tensorize(*first, intrin_name)?;
    }
    sch.annotate_block(state.block, attr::AUTO_TENSORIZE, intrin_name)?;
    state.reserved = inner.len();
    Ok(())
}

/// Multi-level tiling of blocks whose innermost computation maps onto a
/// registered compute intrinsic.
#[derive(Clone)]
pub struct MultiLevelTilingWithIntrin {
    core: TilingCore,
    intrin_name: String,
}

impl MultiLevelTilingWithIntrin {
    pub fn new(
        intrin_name: &str,
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
            intrin_name: intrin_name.to_string(),
        })
    }

    /// Further restricts the blocks this rule tiles.
    pub fn with_filter(mut self, filter: TilingFilter) -> Self {
        self.core.filter = Some(filter);
        self
    }

    pub fn intrin_name(&self) -> &str {
        &self.intrin_name
    }
}

impl fmt::Display for MultiLevelTilingWithIntrin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let intrin = &self.intrin_name;
        write!(f, "MultiLevelTilingWithIntrin(intrin={intrin}, ")?;
        self.core.describe(f)?;
        f.write_str(")")
    }
}

impl ScheduleRule for MultiLevelTilingWithIntrin {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        self.core.initialize(context, "MultiLevelTilingWithIntrin")
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        if !self.core.is_eligible_narrowed(sch, block) {
            return Vec::new();
        }
        let name = &self.intrin_name;
        let Some(intrin) = get_intrin(name) else {
            log::debug!("MultiLevelTilingWithIntrin: intrinsic `{name}` is not registered");
            return Vec::new();
        };
        let Some(mapping) = intrin.match_compute(sch, block) else {
            log::trace!("MultiLevelTilingWithIntrin: {block} does not match `{name}`");
            return Vec::new();
        };
        let Some(mut state) = self.core.start(sch, block) else {
            return Vec::new();
        };
        if let Err(err) = tile_for_intrin(&mut state, &mapping, name) {
            log::debug!("MultiLevelTilingWithIntrin: cannot tensorize {block}: {err}");
            return Vec::new();
        }
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
