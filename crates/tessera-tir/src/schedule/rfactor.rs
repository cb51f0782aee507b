use crate::error::{ScheduleError, ScheduleResult};
use crate::expr::{Access, Expr, Store};
use crate::index::{iv, lv, IndexExpr, Var};
use crate::ir::{Annotations, Block, Buffer, IterKind, IterVar, Loop, Stmt};

use super::{BlockRV, LoopRV, Schedule};

impl Schedule {
    /// Factorizes the reduction over `rf_loop`.
    ///
    /// The reduction block is replaced in its loop nest by an `_rf` block that
    /// accumulates partial results into a new buffer with one extra dimension
    /// (inserted at `factor_axis`) indexed by `rf_loop`. The original block keeps
    /// its id and name and becomes the write-back block: a new loop nest after
    /// the original one that reduces the partial results over that dimension.
    /// Returns the `_rf` block.
    pub fn rfactor(&mut self, rf_loop: LoopRV, factor_axis: usize) -> ScheduleResult<BlockRV> {
        let fail = |reason: &str| ScheduleError::CannotRFactor {
            loop_id: rf_loop,
            reason: reason.to_string(),
        };
        let children = self.get_child_blocks(rf_loop)?;
        let [block] = children.as_slice() else {
            return Err(fail("loop must contain exactly one block"));
        };
        let block = *block;
        let node = self.leaf_block(block)?.clone();
        let Some(store) = node.store.clone() else {
            return Err(fail("block has no store"));
        };
        let Some(reducer) = store.reducer else {
            return Err(fail("block is not a reduction"));
        };
        let reduces = self.loop_iter_type(block, rf_loop)? == Some(IterKind::Reduce);
        if !reduces || !self.loop_is_used(block, rf_loop)? {
            return Err(fail("loop is not a reduction loop of the block"));
        }
        let loops = self.get_loops(block)?;
        let rf_extent = self.for_loop(rf_loop)?.extent;

        // One iterator per enclosing loop, in loop order.
        let mut rf_iters = Vec::with_capacity(loops.len());
        for loop_rv in &loops {
            let extent = self.for_loop(*loop_rv)?.extent;
            let kind = if *loop_rv == rf_loop {
                IterKind::Spatial
            } else if self.loop_is_used(block, *loop_rv)? {
                self.loop_iter_type(block, *loop_rv)?
                    .ok_or_else(|| fail("a loop feeds both spatial and reduction iterators"))?
            } else if extent == 1 {
                IterKind::Spatial
            } else {
                IterKind::Reduce
            };
            rf_iters.push(IterVar {
                kind,
                extent,
                binding: lv(*loop_rv),
            });
        }
        let rf_position = loops
            .iter()
            .position(|l| *l == rf_loop)
            .ok_or_else(|| fail("loop does not enclose the block"))?;

        let loop_to_iter = |var: Var| match var {
            Var::Loop(id) => loops.iter().position(|l| *l == id).map(iv),
            Var::Iter(_) => None,
        };
        let in_rf_iters: Vec<IndexExpr> = node
            .iter_vars
            .iter()
            .map(|it| it.binding.substitute(&mut |var| loop_to_iter(var)))
            .collect();
        let mut to_rf = |var: Var| match var {
            Var::Iter(i) => in_rf_iters.get(i).cloned(),
            Var::Loop(_) => None,
        };

        let original = self
            .func()
            .buffer(store.target.buffer)
            .cloned()
            .ok_or(ScheduleError::UnknownBuffer(store.target.buffer))?;
        let axis = factor_axis.min(original.ndim());
        let mut rf_shape = original.shape.clone();
        rf_shape.insert(axis, rf_extent);
        let rf_name = format!("{}_rf", original.name);
        let rf_name = self.func().unique_buffer_name(&rf_name);
        let mut rf_indices: Vec<IndexExpr> = store
            .target
            .indices
            .iter()
            .map(|index| index.substitute(&mut to_rf))
            .collect();
        rf_indices.insert(axis, iv(rf_position));

        // Write-back block: the original spatial iterators plus the factored one.
        let spatial: Vec<usize> = node
            .iter_vars
            .iter()
            .enumerate()
            .filter(|(_, it)| it.kind == IterKind::Spatial)
            .map(|(i, _)| i)
            .collect();
        let mut renumber = |var: Var| match var {
            Var::Iter(i) => spatial.iter().position(|s| *s == i).map(iv),
            Var::Loop(_) => None,
        };
        let wb_target: Vec<IndexExpr> = store
            .target
            .indices
            .iter()
            .map(|index| index.substitute(&mut renumber))
            .collect();
        let mut wb_read = wb_target.clone();
        wb_read.insert(axis, iv(spatial.len()));
        let mut wb_iters: Vec<IterVar> = spatial
            .iter()
            .map(|i| IterVar {
                kind: IterKind::Spatial,
                extent: node.iter_vars[*i].extent,
                binding: IndexExpr::Const(0),
            })
            .collect();
        wb_iters.push(IterVar {
            kind: IterKind::Reduce,
            extent: rf_extent,
            binding: IndexExpr::Const(0),
        });

        let func = self.func_mut();
        let rf_buffer = func.add_buffer(Buffer {
            name: rf_name,
            shape: rf_shape,
            dtype: original.dtype,
            scope: original.scope.clone(),
        });
        let rf_id = func.fresh_block_id();
        let rf_block = Block {
            id: rf_id,
            name: format!("{}_rf", node.name),
            iter_vars: rf_iters,
            store: Some(Store::reduce(
                Access::new(rf_buffer, rf_indices),
                reducer,
                store.value.substitute(&mut to_rf),
            )),
            predicates: node.predicates.clone(),
            annotations: Annotations::new(),
            children: Vec::new(),
        };

        let loop_ids: Vec<_> = wb_iters.iter().map(|_| func.fresh_loop_id()).collect();
        for (iter, id) in wb_iters.iter_mut().zip(&loop_ids) {
            iter.binding = lv(*id);
        }
        let wb_extents: Vec<i64> = wb_iters.iter().map(|iter| iter.extent).collect();
        let write_back = Block {
            id: node.id,
            name: node.name.clone(),
            iter_vars: wb_iters,
            store: Some(Store::reduce(
                Access::new(store.target.buffer, wb_target),
                reducer,
                Expr::load(rf_buffer, wb_read),
            )),
            predicates: Vec::new(),
            annotations: node.annotations.clone(),
            children: Vec::new(),
        };
        let mut nest = Stmt::Block(write_back);
        for (id, extent) in loop_ids.iter().zip(&wb_extents).rev() {
            nest = Stmt::Loop(Loop::new(*id, *extent, vec![nest]));
        }

        let path = func
            .locate_block(block)
            .ok_or(ScheduleError::UnknownBlock(block))?;
        if let Some(slot) = func.stmt_mut(&path) {
            *slot = Stmt::Block(rf_block);
        }
        func.root.children.insert(path[0] + 1, nest);
        self.record("rfactor", format!("{rf_loop}, {factor_axis} -> {rf_id}"));
        Ok(rf_id)
    }
}
