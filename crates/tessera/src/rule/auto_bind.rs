use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, IterKind, LoopRV, Schedule, ScheduleError, ScheduleResult};

use crate::context::TuneContext;
use crate::error::{RuleError, RuleResult};

use super::analysis::{bounded_candidates, is_tiled, sample_uniform};
use super::{mark_initialized, try_variant, ScheduleRule};

/// Where the loops of a block stand with respect to GPU thread binding.
#[derive(Debug, Default)]
struct Binding {
    block_idx: Option<usize>,
    thread_idx: Option<usize>,
    /// Number of outer loops that form a chain down to the block.
    single_child: usize,
    /// Number of outer loops that are spatial and unbound.
    spatial: usize,
}

impl Binding {
    fn inspect(sch: &Schedule, block: BlockRV, loops: &[LoopRV]) -> ScheduleResult<Self> {
        let mut binding = Binding {
            single_child: loops.len(),
            ..Binding::default()
        };
        let mut spatial_prefix = true;
        for (i, loop_rv) in loops.iter().enumerate() {
            let lp = sch.for_loop(*loop_rv)?;
            match lp.kind.thread_tag() {
                Some(tag) if tag.starts_with("blockIdx") => {
                    binding.block_idx.get_or_insert(i);
                }
                Some(tag) if tag.starts_with("threadIdx") => {
                    binding.thread_idx.get_or_insert(i);
                }
                _ => {}
            }
            if lp.body.len() != 1 && binding.single_child == loops.len() {
                binding.single_child = i + 1;
            }
            let serial_spatial = lp.kind.thread_tag().is_none()
                && sch.loop_iter_type(block, *loop_rv)? == Some(IterKind::Spatial);
            spatial_prefix &= serial_spatial;
            if spatial_prefix {
                binding.spatial += 1;
            }
        }
        Ok(binding)
    }
}

/// Binds the outer spatial loops of unbound blocks to `blockIdx.x` and
/// `threadIdx.x`.
#[derive(Debug, Clone)]
pub struct AutoBind {
    max_threadblocks: i64,
    thread_extents: Vec<i64>,
    /// `-1` reads the limit from the target.
    max_threads_per_block: i64,
    initialized: bool,
}

impl AutoBind {
    pub fn new(
        max_threadblocks: i64,
        thread_extents: &[i64],
        max_threads_per_block: i64,
    ) -> RuleResult<Self> {
        if let Some(extent) = thread_extents.iter().find(|extent| **extent <= 0) {
            return Err(RuleError::InvalidThreadExtent(*extent));
        }
        if max_threadblocks <= 0 {
            return Err(RuleError::InvalidConfig(format!(
                "max_threadblocks must be positive, got {max_threadblocks}"
            )));
        }
        Ok(Self {
            max_threadblocks,
            thread_extents: thread_extents.to_vec(),
            max_threads_per_block,
            initialized: false,
        })
    }

    fn bind(&self, sch: &mut Schedule, block: BlockRV, mut binding: Binding) -> ScheduleResult<()> {
        let mut loops = sch.get_loops(block)?;
        if binding.spatial == 0 {
            let unit = match loops.first() {
                Some(outer) => sch.add_unit_loop_over_loop(*outer)?,
                None => sch.add_unit_loop_over_block(block)?,
            };
            loops.insert(0, unit);
            binding.spatial = 1;
            binding.single_child += 1;
            binding.thread_idx = binding.thread_idx.map(|i| i + 1);
        }
        if let Some(thread_idx) = binding.thread_idx {
            let n_fuse = binding.single_child.min(thread_idx).min(binding.spatial);
            let fused = sch.fuse(&loops[..n_fuse.max(1)])?;
            return sch.bind(fused, "blockIdx.x");
        }
        let n_fuse = binding.single_child.min(binding.spatial).max(1);
        let fused = sch.fuse(&loops[..n_fuse])?;
        let extent = sch.for_loop(fused)?.extent;
        let max_threads = self.max_threads_per_block;
        if extent <= self.max_threadblocks.saturating_mul(max_threads) {
            let candidates = bounded_candidates(&self.thread_extents, extent.min(max_threads));
            let factor = sample_uniform(sch, &candidates)?;
            let parts = sch.split(fused, &[None, Some(factor)])?;
            let [outer, inner] = parts.as_slice() else {
                return Err(ScheduleError::malformed("expected a two-way split"));
            };
            sch.bind(*outer, "blockIdx.x")?;
            sch.bind(*inner, "threadIdx.x")
        } else {
            let factors = [None, Some(self.max_threadblocks), Some(max_threads)];
            let parts = sch.split(fused, &factors)?;
            let [serial, blocks, threads] = parts.as_slice() else {
                return Err(ScheduleError::malformed("expected a three-way split"));
            };
            sch.reorder(&[*blocks, *threads, *serial])?;
            sch.bind(*blocks, "blockIdx.x")?;
            sch.bind(*threads, "threadIdx.x")
        }
    }
}

impl Default for AutoBind {
    fn default() -> Self {
        Self {
            max_threadblocks: 256,
            thread_extents: vec![32, 64, 128, 256, 512, 1024],
            max_threads_per_block: -1,
            initialized: false,
        }
    }
}

impl fmt::Display for AutoBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AutoBind(max_threadblocks={}, thread_extents={:?}, max_threads_per_block={})",
            self.max_threadblocks, self.thread_extents, self.max_threads_per_block
        )
    }
}

impl ScheduleRule for AutoBind {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        let rule = "AutoBind";
        if self.max_threads_per_block == -1 {
            let target = context.require_target(rule)?;
            let max_threads = target.require_max_threads_per_block()?;
            mark_initialized(&mut self.initialized, rule)?;
            self.max_threads_per_block = max_threads;
            return Ok(());
        }
        mark_initialized(&mut self.initialized, rule)
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        if block == sch.root_block() || is_tiled(sch, block) || self.max_threads_per_block <= 0 {
            return Vec::new();
        }
        let inspected = sch
            .get_loops(block)
            .and_then(|loops| Binding::inspect(sch, block, &loops));
        let binding = match inspected {
            Ok(binding) => binding,
            Err(err) => {
                log::debug!("AutoBind: cannot inspect {block}: {err}");
                return Vec::new();
            }
        };
        match (binding.block_idx, binding.thread_idx) {
            (Some(_), Some(_)) => return Vec::new(),
            (Some(_), None) => {
                log::debug!("AutoBind: {block} is bound to blockIdx but not to threadIdx");
                return Vec::new();
            }
            _ => {}
        }
        try_variant(sch, "AutoBind", |sch| self.bind(sch, block, binding))
            .into_iter()
            .collect()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
