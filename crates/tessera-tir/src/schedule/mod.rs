//! Mutable schedules over a [`PrimFunc`].
//!
//! A [`Schedule`] owns one function body, a seeded random stream used by the
//! sampling primitives, and a trace of every primitive applied so far. Block
//! and loop handles are plain ids: they survive [`Schedule::fork`] and stay
//! valid until the object they name is removed by a transformation.

mod cache;
mod compute_at;
mod inline;
mod loops;
mod query;
mod rfactor;
mod sampling;
mod tensorize;
mod verify;

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ScheduleError, ScheduleResult};
use crate::ir::{AnnValue, Block, BlockId, Loop, LoopId, PrimFunc};

pub use compute_at::ComputeLocation;
pub use tensorize::TENSORIZE_ANNOTATION;

/// Handle to a block of a schedule.
pub type BlockRV = BlockId;
/// Handle to a loop of a schedule.
pub type LoopRV = LoopId;

/// One applied primitive, kept for debugging and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: &'static str,
    pub detail: String,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.detail)
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    func: PrimFunc,
    rng: StdRng,
    trace: Vec<Instruction>,
}

impl Schedule {
    pub fn new(func: PrimFunc, seed: u64) -> Self {
        Self {
            func,
            rng: StdRng::seed_from_u64(seed),
            trace: Vec::new(),
        }
    }

    pub fn func(&self) -> &PrimFunc {
        &self.func
    }

    pub fn trace(&self) -> &[Instruction] {
        &self.trace
    }

    /// Reseeds the random stream used by sampling primitives.
    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Draws a seed for a derived random stream, advancing this schedule's stream.
    pub fn fork_seed(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Copies the schedule; the copy gets its own random stream derived from
    /// this one.
    pub fn fork(&mut self) -> Schedule {
        let seed = self.fork_seed();
        Schedule {
            func: self.func.clone(),
            rng: StdRng::seed_from_u64(seed),
            trace: self.trace.clone(),
        }
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub(crate) fn func_mut(&mut self) -> &mut PrimFunc {
        &mut self.func
    }

    pub(crate) fn record(&mut self, kind: &'static str, detail: String) {
        log::trace!("{}({})", kind, detail);
        self.trace.push(Instruction { kind, detail });
    }

    pub fn root_block(&self) -> BlockRV {
        self.func.root.id
    }

    pub fn has_block(&self, block: BlockRV) -> bool {
        self.func.block(block).is_some()
    }

    pub fn has_loop(&self, loop_rv: LoopRV) -> bool {
        self.func.locate_loop(loop_rv).is_some()
    }

    pub fn block(&self, block: BlockRV) -> ScheduleResult<&Block> {
        self.func
            .block(block)
            .ok_or(ScheduleError::UnknownBlock(block))
    }

    pub fn for_loop(&self, loop_rv: LoopRV) -> ScheduleResult<&Loop> {
        self.func
            .for_loop(loop_rv)
            .ok_or(ScheduleError::UnknownLoop(loop_rv))
    }

    pub(crate) fn leaf_block(&self, block: BlockRV) -> ScheduleResult<&Block> {
        let node = self.block(block)?;
        if block == self.func.root.id {
            return Err(ScheduleError::RootBlock(block));
        }
        if !node.is_leaf() {
            return Err(ScheduleError::NotLeaf(block));
        }
        Ok(node)
    }

    pub fn annotate_block(
        &mut self,
        block: BlockRV,
        key: &str,
        value: impl Into<AnnValue>,
    ) -> ScheduleResult<()> {
        let value = value.into();
        let node = self
            .func
            .block_mut(block)
            .ok_or(ScheduleError::UnknownBlock(block))?;
        node.annotations.insert(key.to_string(), value.clone());
        self.record("annotate", format!("{block}, {key:?}, {value}"));
        Ok(())
    }

    pub fn unannotate_block(&mut self, block: BlockRV, key: &str) -> ScheduleResult<()> {
        let node = self
            .func
            .block_mut(block)
            .ok_or(ScheduleError::UnknownBlock(block))?;
        node.annotations.remove(key);
        self.record("unannotate", format!("{block}, {key:?}"));
        Ok(())
    }

    pub fn annotate_loop(
        &mut self,
        loop_rv: LoopRV,
        key: &str,
        value: impl Into<AnnValue>,
    ) -> ScheduleResult<()> {
        let value = value.into();
        let node = self
            .func
            .for_loop_mut(loop_rv)
            .ok_or(ScheduleError::UnknownLoop(loop_rv))?;
        node.annotations.insert(key.to_string(), value.clone());
        self.record("annotate", format!("{loop_rv}, {key:?}, {value}"));
        Ok(())
    }

    pub fn block_annotation(&self, block: BlockRV, key: &str) -> Option<&AnnValue> {
        self.func.block(block)?.annotations.get(key)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.func)
    }
}
