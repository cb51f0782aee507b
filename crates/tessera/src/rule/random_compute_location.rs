use std::any::Any;
use std::cell::RefCell;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_tir::{BlockRV, Schedule, ScheduleResult};

use crate::attr;
use crate::context::TuneContext;
use crate::error::RuleResult;

use super::analysis::is_tiled;
use super::{mark_initialized, try_variant, ScheduleRule};

/// Moves a free-standing block to a random legal compute location.
///
/// The rule draws locations from its own random stream, seeded from the
/// tune context. [`ScheduleRule::clone_rule`] seeds the copy from that
/// stream, so a clone and its original make independent choices.
#[derive(Debug)]
pub struct RandomComputeLocation {
    rng: RefCell<StdRng>,
    initialized: bool,
}

impl RandomComputeLocation {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    fn with_seed(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            initialized: false,
        }
    }

    /// A block whose loop nest holds nothing else and that has not been
    /// tiled yet. It must feed some consumer unless it was marked to bring
    /// its producer along.
    fn is_free(sch: &Schedule, block: BlockRV) -> bool {
        if block == sch.root_block() || is_tiled(sch, block) {
            return false;
        }
        if !sch.block(block).is_ok_and(|node| node.is_leaf()) {
            return false;
        }
        let Ok(loops) = sch.get_loops(block) else {
            return false;
        };
        let Some(outer) = loops.first() else {
            return false;
        };
        if sch.get_child_blocks(*outer).unwrap_or_default().len() != 1 {
            return false;
        }
        let annotated = sch.block_annotation(block, attr::RANDOM_COMPUTE_PRODUCER);
        annotated.is_some() || !sch.get_consumers(block).unwrap_or_default().is_empty()
    }

    fn place(&self, sch: &mut Schedule, block: BlockRV) -> ScheduleResult<()> {
        let candidates = sch.compute_location_candidates(block)?;
        let index = self.rng.borrow_mut().gen_range(0..candidates.len());
        log::trace!("RandomComputeLocation: {block} -> {:?}", candidates[index]);
        sch.apply_compute_location(block, candidates[index])
    }
}

impl Default for RandomComputeLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RandomComputeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RandomComputeLocation")
    }
}

impl ScheduleRule for RandomComputeLocation {
    fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        mark_initialized(&mut self.initialized, "RandomComputeLocation")?;
        self.rng = RefCell::new(StdRng::seed_from_u64(context.seed()));
        Ok(())
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        if !Self::is_free(sch, block) {
            return Vec::new();
        }
        let key = attr::RANDOM_COMPUTE_PRODUCER;
        let variant = try_variant(sch, "RandomComputeLocation", |variant| {
            if variant.block_annotation(block, key).is_none() {
                return self.place(variant, block);
            }
            variant.unannotate_block(block, key)?;
            self.place(variant, block)?;
            let producers = variant.get_producers(block)?;
            match producers.as_slice() {
                [producer] => self.place(variant, *producer),
                _ => Ok(()),
            }
        });
        variant.into_iter().collect()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        let seed = self.rng.borrow_mut().gen();
        Box::new(Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            initialized: self.initialized,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
