use crate::error::{ScheduleError, ScheduleResult};
use crate::intrin;
use crate::ir::{AnnValue, Stmt};

use super::{LoopRV, Schedule};

/// Loop annotation naming the intrinsic a loop nest is mapped to.
pub const TENSORIZE_ANNOTATION: &str = "tensorize_intrin";

impl Schedule {
    /// Marks the loop nest rooted at `loop_rv` as computed by a tensor
    /// intrinsic. The nest must hold a single block and iterate over as many
    /// points as the intrinsic computes.
    pub fn tensorize(&mut self, loop_rv: LoopRV, intrin_name: &str) -> ScheduleResult<()> {
        let desc = intrin::get_intrin(intrin_name)
            .ok_or_else(|| ScheduleError::UnknownIntrin(intrin_name.to_string()))?;
        let fail = |reason: String| ScheduleError::CannotTensorize {
            loop_id: loop_rv,
            intrin: intrin_name.to_string(),
            reason,
        };
        let lp = self.for_loop(loop_rv)?;
        let blocks = Stmt::Loop(lp.clone()).blocks();
        if blocks.len() != 1 {
            return Err(fail(format!("nest holds {} blocks", blocks.len())));
        }
        let mut points = lp.extent;
        let mut current = lp;
        while let Some(inner) = current.only_child_loop() {
            points *= inner.extent;
            current = inner;
        }
        if points != desc.points() {
            return Err(fail(format!(
                "nest covers {points} points, intrinsic covers {}",
                desc.points()
            )));
        }
        self.annotate_loop(loop_rv, TENSORIZE_ANNOTATION, AnnValue::from(intrin_name))?;
        self.record("tensorize", format!("{loop_rv}, {intrin_name:?}"));
        Ok(())
    }
}
