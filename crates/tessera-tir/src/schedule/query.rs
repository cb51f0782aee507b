use std::collections::BTreeMap;

use crate::error::{ScheduleError, ScheduleResult};
use crate::index::{IndexExpr, Var};
use crate::ir::{IterKind, LoopId};

use super::{BlockRV, LoopRV, Schedule};

impl Schedule {
    /// Every block in pre-order, the root block first.
    pub fn blocks(&self) -> Vec<BlockRV> {
        self.func().blocks()
    }

    pub fn get_block(&self, name: &str) -> ScheduleResult<BlockRV> {
        self.func()
            .blocks()
            .into_iter()
            .find(|id| self.func().block(*id).is_some_and(|b| b.name == name))
            .ok_or_else(|| ScheduleError::BlockNameNotFound(name.to_string()))
    }

    /// Loops enclosing a block, outermost first.
    pub fn get_loops(&self, block: BlockRV) -> ScheduleResult<Vec<LoopRV>> {
        if block == self.root_block() {
            return Ok(Vec::new());
        }
        let path = self
            .func()
            .locate_block(block)
            .ok_or(ScheduleError::UnknownBlock(block))?;
        Ok(self.func().loops_on_path(&path))
    }

    pub fn get_child_blocks(&self, loop_rv: LoopRV) -> ScheduleResult<Vec<BlockRV>> {
        let lp = self.for_loop(loop_rv)?;
        let mut out = Vec::new();
        for stmt in &lp.body {
            stmt.for_each_block(&mut |block| out.push(block.id));
        }
        Ok(out)
    }

    /// Blocks writing a buffer read by `block`.
    pub fn get_producers(&self, block: BlockRV) -> ScheduleResult<Vec<BlockRV>> {
        let reads = self.block(block)?.read_buffers();
        Ok(self
            .func()
            .leaf_blocks()
            .into_iter()
            .filter(|other| other.id != block)
            .filter(|other| other.write_buffer().is_some_and(|buf| reads.contains(&buf)))
            .map(|other| other.id)
            .collect())
    }

    /// Blocks reading the buffer written by `block`.
    pub fn get_consumers(&self, block: BlockRV) -> ScheduleResult<Vec<BlockRV>> {
        let Some(written) = self.block(block)?.write_buffer() else {
            return Ok(Vec::new());
        };
        Ok(self
            .func()
            .leaf_blocks()
            .into_iter()
            .filter(|other| other.id != block)
            .filter(|other| other.read_buffers().contains(&written))
            .map(|other| other.id)
            .collect())
    }

    /// Whether the block writes one of the function parameters.
    pub fn is_output_block(&self, block: BlockRV) -> ScheduleResult<bool> {
        let node = self.block(block)?;
        Ok(node
            .write_buffer()
            .is_some_and(|buffer| self.func().is_param(buffer)))
    }

    /// Every iterator is bound to its own loop with a matching extent.
    pub fn is_trivial_binding(&self, block: BlockRV) -> ScheduleResult<bool> {
        let node = self.block(block)?;
        let mut seen: Vec<LoopId> = Vec::new();
        for iv in &node.iter_vars {
            match &iv.binding {
                IndexExpr::Const(0) if iv.extent == 1 => {}
                IndexExpr::Var(Var::Loop(id)) => {
                    if seen.contains(id) || self.for_loop(*id)?.extent != iv.extent {
                        return Ok(false);
                    }
                    seen.push(*id);
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Classifies a loop by the iterators bound through it: `Spatial` when only
    /// spatial iterators use it (or none do), `Reduce` when only reduction
    /// iterators do, and `None` when both kinds use it.
    pub fn loop_iter_type(
        &self,
        block: BlockRV,
        loop_rv: LoopRV,
    ) -> ScheduleResult<Option<IterKind>> {
        let node = self.block(block)?;
        let mut spatial = false;
        let mut reduce = false;
        for iv in &node.iter_vars {
            if iv.binding.uses(Var::Loop(loop_rv)) {
                match iv.kind {
                    IterKind::Spatial => spatial = true,
                    IterKind::Reduce => reduce = true,
                }
            }
        }
        Ok(match (spatial, reduce) {
            (true, true) => None,
            (false, true) => Some(IterKind::Reduce),
            _ => Some(IterKind::Spatial),
        })
    }

    /// Whether the loop feeds at least one iterator of the block.
    pub fn loop_is_used(&self, block: BlockRV, loop_rv: LoopRV) -> ScheduleResult<bool> {
        let node = self.block(block)?;
        Ok(node
            .iter_vars
            .iter()
            .any(|iv| iv.binding.uses(Var::Loop(loop_rv))))
    }

    /// Whether every leaf block of the function is spatial.
    pub fn is_spatial_func(&self) -> bool {
        self.func()
            .leaf_blocks()
            .into_iter()
            .all(|block| block.is_spatial())
    }

    /// Each read index is an iterator (optionally offset by a constant) or a
    /// constant, and no iterator appears twice within one access.
    pub fn access_is_injective(&self, block: BlockRV) -> ScheduleResult<bool> {
        let node = self.leaf_block(block)?;
        for access in node.store.iter().flat_map(|store| store.value.loads()) {
            if read_iters(&access.indices).is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Injective, and the iterators of every read appear in the same relative
    /// order as in the written indices.
    pub fn access_is_ordered(&self, block: BlockRV) -> ScheduleResult<bool> {
        let node = self.leaf_block(block)?;
        let Some(store) = &node.store else {
            return Ok(false);
        };
        let Some(write_order) = store.target.plain_iters() else {
            return Ok(false);
        };
        for access in store.value.loads() {
            let Some(iters) = read_iters(&access.indices) else {
                return Ok(false);
            };
            let mut last: Option<usize> = None;
            for iter in iters {
                let Some(position) = write_order.iter().position(|w| *w == iter) else {
                    return Ok(false);
                };
                if last.is_some_and(|prev| prev >= position) {
                    return Ok(false);
                }
                last = Some(position);
            }
        }
        Ok(true)
    }

    /// A spatial copy block whose single read uses exactly the written indices.
    pub fn is_write_cache(&self, block: BlockRV) -> ScheduleResult<bool> {
        let node = self.block(block)?;
        if !node.is_leaf() || !node.is_spatial() {
            return Ok(false);
        }
        let Some(store) = &node.store else {
            return Ok(false);
        };
        Ok(match store.value.strip_casts() {
            crate::expr::Expr::Load(access) => {
                access.indices == store.target.indices && access.buffer != store.target.buffer
            }
            _ => false,
        })
    }

    /// Number of dimensions of each buffer read by the block, in read order.
    pub fn read_buffer_ndims(&self, block: BlockRV) -> ScheduleResult<Vec<usize>> {
        let node = self.leaf_block(block)?;
        node.read_buffers()
            .into_iter()
            .map(|buffer| {
                self.func()
                    .buffer(buffer)
                    .map(|b| b.ndim())
                    .ok_or(ScheduleError::UnknownBuffer(buffer))
            })
            .collect()
    }

    /// Ranges of all loop variables, usable for index simplification.
    pub(crate) fn loop_ranges(&self) -> BTreeMap<LoopId, (i64, i64)> {
        self.func().loop_ranges()
    }

    pub(crate) fn loop_bound_lookup(
        ranges: &BTreeMap<LoopId, (i64, i64)>,
    ) -> impl Fn(Var) -> Option<(i64, i64)> + '_ {
        move |var| match var {
            Var::Loop(id) => ranges.get(&id).copied(),
            Var::Iter(_) => None,
        }
    }
}

/// Iterators used by a read access, or `None` when the access is not a
/// per-dimension iterator (plus constant) projection.
fn read_iters(indices: &[IndexExpr]) -> Option<Vec<usize>> {
    let mut out = Vec::new();
    for index in indices {
        let form = index.linear()?;
        match form.terms.len() {
            0 => {}
            1 => {
                let (var, coeff) = form.terms.iter().next()?;
                match (var, coeff) {
                    (Var::Iter(i), 1) => {
                        if out.contains(i) {
                            return None;
                        }
                        out.push(*i);
                    }
                    _ => return None,
                }
            }
            _ => return None,
        }
    }
    Some(out)
}
