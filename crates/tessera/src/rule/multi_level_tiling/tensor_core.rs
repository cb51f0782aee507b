use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use tessera_tir::intrin::{get_intrin, has_intrin};
use tessera_tir::{BlockRV, Schedule, ScheduleResult};

use crate::attr;
use crate::context::TuneContext;
use crate::error::{RuleError, RuleResult};
use crate::rule::ScheduleRule;

use super::with_intrin::tile_for_intrin;
use super::{sub_rule, ReuseConfig, State, TilingCore, TilingFilter};

/// The intrinsics implementing one tensor-core computation: accumulator
/// initialization, operand loads, the multiply-accumulate and the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrinGroup {
    pub init: String,
    pub load_a: String,
    pub load_b: String,
    pub compute: String,
    pub store: String,
}

impl IntrinGroup {
    pub fn new(init: &str, load_a: &str, load_b: &str, compute: &str, store: &str) -> Self {
        Self {
            init: init.to_string(),
            load_a: load_a.to_string(),
            load_b: load_b.to_string(),
            compute: compute.to_string(),
            store: store.to_string(),
        }
    }

    /// The 16x16x16 wmma group for `in_dtype` operands accumulated in
    /// `out_dtype` (`"f16"`, `"f32"`, `"s8"`, `"s32"`), with the second operand
    /// optionally transposed.
    pub fn wmma(in_dtype: &str, out_dtype: &str, trans_b: bool) -> Self {
        let trans = if trans_b { "_trans" } else { "" };
        Self {
            init: format!("wmma_fill_16x16x16_{out_dtype}"),
            load_a: format!("wmma_load_16x16x16_{in_dtype}_a_shared_dyn"),
            load_b: format!("wmma_load_16x16x16_{in_dtype}_b{trans}_shared_dyn"),
            compute: format!("wmma_sync_16x16x16_{in_dtype}{in_dtype}{out_dtype}{trans}"),
            store: format!("wmma_store_16x16x16_{out_dtype}_shared_dyn"),
        }
    }

    /// Parses the role map form
    /// `{"init": .., "load_a": .., "load_b": .., "compute": .., "store": ..}`.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn names(&self) -> [&str; 5] {
        [
            self.init.as_str(),
            self.load_a.as_str(),
            self.load_b.as_str(),
            self.compute.as_str(),
            self.store.as_str(),
        ]
    }
}

/// Multi-level tiling onto tensor cores. Each intrinsic group whose compute
/// intrinsic matches the block contributes its own variants.
#[derive(Clone)]
pub struct MultiLevelTilingTensorCore {
    core: TilingCore,
    groups: Vec<IntrinGroup>,
    use_software_pipeline: bool,
}

impl MultiLevelTilingTensorCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        groups: Vec<IntrinGroup>,
        structure: &str,
        tile_binds: Option<&[&str]>,
        max_innermost_factor: Option<i64>,
        vector_load_lens: Option<&[i64]>,
        reuse_read: Option<ReuseConfig>,
        reuse_write: Option<ReuseConfig>,
        use_software_pipeline: bool,
    ) -> RuleResult<Self> {
        if groups.is_empty() {
            return Err(RuleError::InvalidConfig(
                "tensor-core tiling needs at least one intrinsic group".to_string(),
            ));
        }
        Ok(Self {
            core: TilingCore::new(
                structure,
                tile_binds,
                max_innermost_factor,
                vector_load_lens,
                reuse_read,
                reuse_write,
            )?,
            groups,
            use_software_pipeline,
        })
    }

    pub fn with_filter(mut self, filter: TilingFilter) -> Self {
        self.core.filter = Some(filter);
        self
    }

    pub fn groups(&self) -> &[IntrinGroup] {
        &self.groups
    }

    fn apply_group(
        &self,
        sch: &mut Schedule,
        block: BlockRV,
        group: &IntrinGroup,
    ) -> Vec<Schedule> {
        if let Some(missing) = group.names().into_iter().find(|name| !has_intrin(name)) {
            log::debug!("MultiLevelTilingTensorCore: intrinsic `{missing}` is not registered");
            return Vec::new();
        }
        let name = &group.compute;
        let Some(intrin) = get_intrin(name) else {
            return Vec::new();
        };
        let Some(mapping) = intrin.match_compute(sch, block) else {
            return Vec::new();
        };
        let Some(mut state) = self.core.start(sch, block) else {
            return Vec::new();
        };
        let tiled = tile_for_intrin(&mut state, &mapping, name).and_then(|()| {
            state
                .sch
                .annotate_block(block, attr::AUTO_TENSORIZE_INIT, group.init.as_str())
        });
        if let Err(err) = tiled {
            log::debug!(
                "MultiLevelTilingTensorCore: cannot tensorize {block} with `{name}`: {err}"
            );
            return Vec::new();
        }
        let states = self.core.apply_sub_rules(vec![state]);
        sub_rule(states, "tensor-core annotation", |state| {
            self.annotate_stages(state, group).map(|state| vec![state])
        })
        .into_iter()
        .map(|state| state.sch)
        .collect()
    }

    /// Marks the cache stages with the data-movement intrinsics of the group
    /// and, when enabled, pipelines the outer reduction loop.
    fn annotate_stages(&self, mut state: State, group: &IntrinGroup) -> ScheduleResult<State> {
        let loads = [&group.load_a, &group.load_b];
        for (cache, intrin) in state.read_reuse.values().zip(loads) {
            state
                .sch
                .annotate_block(*cache, attr::AUTO_TENSORIZE, intrin.as_str())?;
        }
        if let Some(cache) = state.write_reuse {
            state
                .sch
                .annotate_block(cache, attr::AUTO_TENSORIZE, group.store.as_str())?;
        }
        let r_indices = &self.core.r_indices;
        if self.use_software_pipeline && r_indices.len() >= 2 {
            let outer_reduction = state.tile_loop(r_indices[r_indices.len() - 2] + 1)?;
            let (stages, order) = (vec![0i64, 0, 0, 1, 1], vec![0i64, 3, 1, 4, 2]);
            state
                .sch
                .annotate_loop(outer_reduction, attr::SOFTWARE_PIPELINE_STAGE, stages)?;
            state
                .sch
                .annotate_loop(outer_reduction, attr::SOFTWARE_PIPELINE_ORDER, order)?;
        }
        Ok(state)
    }
}

impl fmt::Display for MultiLevelTilingTensorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let computes: Vec<&str> = self.groups.iter().map(|g| g.compute.as_str()).collect();
        write!(f, "MultiLevelTilingTensorCore(intrin_groups={computes:?}, ")?;
        self.core.describe(f)?;
        write!(f, ", use_software_pipeline={})", self.use_software_pipeline)
    }
}

impl ScheduleRule for MultiLevelTilingTensorCore {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        let rule = "MultiLevelTilingTensorCore";
        context.require_target(rule)?.require_thread_warp_size()?;
        self.core.initialize(context, rule)
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        if !self.core.is_eligible_narrowed(sch, block) {
            return Vec::new();
        }
        let mut results = Vec::new();
        for group in &self.groups {
            results.extend(self.apply_group(sch, block, group));
        }
        results
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
