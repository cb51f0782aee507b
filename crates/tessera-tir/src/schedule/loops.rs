use crate::error::{ScheduleError, ScheduleResult};
use crate::index::{lv, IndexExpr, Var};
use crate::ir::{Annotations, BlockId, ForKind, Loop, LoopId, Predicate, Stmt};

use super::{BlockRV, LoopRV, Schedule};

struct LoopHeader {
    id: LoopId,
    extent: i64,
    kind: ForKind,
    annotations: Annotations,
}

impl Schedule {
    /// Splits a loop into nested loops with the given extents, outermost first.
    ///
    /// At most one factor may be `None`; it is inferred as the ceiling of the
    /// extent divided by the product of the others. When the product exceeds
    /// the extent every block under the loop receives a guarding predicate.
    pub fn split(
        &mut self,
        loop_rv: LoopRV,
        factors: &[Option<i64>],
    ) -> ScheduleResult<Vec<LoopRV>> {
        let extent = self.for_loop(loop_rv)?.extent;
        let invalid = |reason: &str| ScheduleError::InvalidFactors {
            loop_id: loop_rv,
            extent,
            reason: reason.to_string(),
        };
        if factors.is_empty() {
            return Err(invalid("no factors given"));
        }
        if factors.iter().filter(|f| f.is_none()).count() > 1 {
            return Err(invalid("at most one factor can be inferred"));
        }
        if factors.iter().flatten().any(|f| *f <= 0) {
            return Err(invalid("factors must be positive"));
        }
        let known: i64 = factors.iter().flatten().product();
        let resolved: Vec<i64> = factors
            .iter()
            .map(|f| f.unwrap_or((extent + known - 1) / known))
            .collect();
        let total: i64 = resolved.iter().product();
        if total < extent {
            return Err(invalid("factor product is smaller than the extent"));
        }
        if resolved.len() == 1 {
            return Ok(vec![loop_rv]);
        }

        let path = self
            .func()
            .locate_loop(loop_rv)
            .ok_or(ScheduleError::UnknownLoop(loop_rv))?;
        let new_ids: Vec<LoopId> = resolved
            .iter()
            .map(|_| self.func_mut().fresh_loop_id())
            .collect();
        let body = match self.func_mut().stmt_mut(&path) {
            Some(Stmt::Loop(lp)) => std::mem::take(&mut lp.body),
            _ => return Err(ScheduleError::UnknownLoop(loop_rv)),
        };
        let mut nest = body;
        for (id, factor) in new_ids.iter().zip(&resolved).rev() {
            nest = vec![Stmt::Loop(Loop::new(*id, *factor, nest))];
        }
        let replacement = nest.pop().ok_or_else(|| invalid("empty split"))?;
        if let Some(stmt) = self.func_mut().stmt_mut(&path) {
            *stmt = replacement;
        }

        let mut fused = IndexExpr::Const(0);
        let mut stride = 1;
        for (id, factor) in new_ids.iter().zip(&resolved).rev() {
            fused = lv(*id).scale(stride).add(fused);
            stride *= factor;
        }
        let blocks = self.blocks_under(&path);
        self.rewrite_loop_vars(&blocks, loop_rv, &fused);
        if total > extent {
            for id in &blocks {
                if let Some(block) = self.func_mut().block_mut(*id) {
                    block.predicates.push(Predicate {
                        expr: fused.clone(),
                        bound: extent,
                    });
                }
            }
        }
        self.record("split", format!("{loop_rv}, {resolved:?}"));
        Ok(new_ids)
    }

    /// Fuses a chain of perfectly nested loops into one.
    pub fn fuse(&mut self, loops: &[LoopRV]) -> ScheduleResult<LoopRV> {
        let Some(first) = loops.first().copied() else {
            return Err(ScheduleError::NotAChain("nothing to fuse".to_string()));
        };
        if loops.len() == 1 {
            self.for_loop(first)?;
            return Ok(first);
        }
        let mut extents = Vec::with_capacity(loops.len());
        for pair in loops.windows(2) {
            let outer = self.for_loop(pair[0])?;
            match outer.only_child_loop() {
                Some(inner) if inner.id == pair[1] => extents.push(outer.extent),
                _ => {
                    return Err(ScheduleError::NotAChain(format!(
                        "{} is not the only child of {}",
                        pair[1], pair[0]
                    )))
                }
            }
        }
        let last = loops[loops.len() - 1];
        extents.push(self.for_loop(last)?.extent);

        let path = self
            .func()
            .locate_loop(first)
            .ok_or(ScheduleError::UnknownLoop(first))?;
        let body = match self.func_mut().for_loop_mut(last) {
            Some(lp) => std::mem::take(&mut lp.body),
            None => return Err(ScheduleError::UnknownLoop(last)),
        };
        let fused_id = self.func_mut().fresh_loop_id();
        let total: i64 = extents.iter().product();
        if let Some(stmt) = self.func_mut().stmt_mut(&path) {
            *stmt = Stmt::Loop(Loop::new(fused_id, total, body));
        }

        let blocks = self.blocks_under(&path);
        for (i, loop_rv) in loops.iter().enumerate() {
            let inner: i64 = extents[i + 1..].iter().product();
            let mut expr = lv(fused_id).floordiv(inner);
            if i > 0 {
                expr = expr.floormod(extents[i]);
            }
            self.rewrite_loop_vars(&blocks, *loop_rv, &expr);
        }
        self.record("fuse", format!("{loops:?} -> {fused_id}"));
        Ok(fused_id)
    }

    /// Reorders loops that lie on one chain of single-child loops.
    ///
    /// The listed loops take the positions they jointly occupy along the chain
    /// in the given order; loops on the chain that are not listed stay put.
    pub fn reorder(&mut self, order: &[LoopRV]) -> ScheduleResult<()> {
        if order.len() <= 1 {
            for loop_rv in order {
                self.for_loop(*loop_rv)?;
            }
            return Ok(());
        }
        for (i, loop_rv) in order.iter().enumerate() {
            if order[..i].contains(loop_rv) {
                return Err(ScheduleError::NotAChain(format!("{loop_rv} listed twice")));
            }
        }
        let mut deepest: Option<(LoopRV, Vec<usize>)> = None;
        for loop_rv in order {
            let path = self
                .func()
                .locate_loop(*loop_rv)
                .ok_or(ScheduleError::UnknownLoop(*loop_rv))?;
            if deepest.as_ref().map_or(true, |(_, p)| path.len() > p.len()) {
                deepest = Some((*loop_rv, path));
            }
        }
        let Some((deepest_id, deepest_path)) = deepest else {
            return Ok(());
        };
        let mut ancestry = self.func().loops_on_path(&deepest_path);
        ancestry.push(deepest_id);
        let top = ancestry
            .iter()
            .position(|id| order.contains(id))
            .ok_or_else(|| ScheduleError::NotAChain("no listed loop on the chain".to_string()))?;
        let chain: Vec<LoopId> = ancestry[top..].to_vec();
        for loop_rv in order {
            if !chain.contains(loop_rv) {
                return Err(ScheduleError::NotAChain(format!(
                    "{loop_rv} is not an ancestor of {deepest_id}"
                )));
            }
        }
        for loop_rv in &chain[..chain.len() - 1] {
            if self.for_loop(*loop_rv)?.body.len() != 1 {
                return Err(ScheduleError::NotAChain(format!("{loop_rv} has more than one child")));
            }
        }

        let mut headers = Vec::with_capacity(chain.len());
        for loop_rv in &chain {
            let lp = self.for_loop(*loop_rv)?;
            headers.push(LoopHeader {
                id: lp.id,
                extent: lp.extent,
                kind: lp.kind.clone(),
                annotations: lp.annotations.clone(),
            });
        }
        let mut listed = order.iter();
        let mut arranged: Vec<LoopId> = Vec::with_capacity(chain.len());
        for loop_rv in &chain {
            if order.contains(loop_rv) {
                arranged.push(*listed.next().unwrap_or(loop_rv));
            } else {
                arranged.push(*loop_rv);
            }
        }
        let mut path = self
            .func()
            .locate_loop(chain[0])
            .ok_or(ScheduleError::UnknownLoop(chain[0]))?;
        for target in &arranged {
            let Some(header_index) = headers.iter().position(|h| h.id == *target) else {
                return Err(ScheduleError::UnknownLoop(*target));
            };
            let header = headers.swap_remove(header_index);
            match self.func_mut().stmt_mut(&path) {
                Some(Stmt::Loop(lp)) => {
                    lp.id = header.id;
                    lp.extent = header.extent;
                    lp.kind = header.kind;
                    lp.annotations = header.annotations;
                }
                _ => return Err(ScheduleError::malformed("reorder chain lost its loop")),
            }
            path.push(0);
        }
        self.record("reorder", format!("{order:?}"));
        Ok(())
    }

    pub fn bind(&mut self, loop_rv: LoopRV, thread_axis: &str) -> ScheduleResult<()> {
        self.set_loop_kind(loop_rv, ForKind::ThreadBinding(thread_axis.to_string()))?;
        self.record("bind", format!("{loop_rv}, {thread_axis:?}"));
        Ok(())
    }

    pub fn parallel(&mut self, loop_rv: LoopRV) -> ScheduleResult<()> {
        self.set_loop_kind(loop_rv, ForKind::Parallel)?;
        self.record("parallel", format!("{loop_rv}"));
        Ok(())
    }

    pub fn vectorize(&mut self, loop_rv: LoopRV) -> ScheduleResult<()> {
        self.set_loop_kind(loop_rv, ForKind::Vectorized)?;
        self.record("vectorize", format!("{loop_rv}"));
        Ok(())
    }

    pub fn unroll(&mut self, loop_rv: LoopRV) -> ScheduleResult<()> {
        self.set_loop_kind(loop_rv, ForKind::Unrolled)?;
        self.record("unroll", format!("{loop_rv}"));
        Ok(())
    }

    fn set_loop_kind(&mut self, loop_rv: LoopRV, kind: ForKind) -> ScheduleResult<()> {
        let lp = self
            .func_mut()
            .for_loop_mut(loop_rv)
            .ok_or(ScheduleError::UnknownLoop(loop_rv))?;
        lp.kind = kind;
        Ok(())
    }

    /// Wraps the block in a new loop of extent one.
    pub fn add_unit_loop_over_block(&mut self, block: BlockRV) -> ScheduleResult<LoopRV> {
        self.leaf_block(block)?;
        let path = self
            .func()
            .locate_block(block)
            .ok_or(ScheduleError::UnknownBlock(block))?;
        let id = self.wrap_in_unit_loop(&path)?;
        self.record("add_unit_loop", format!("{block} -> {id}"));
        Ok(id)
    }

    /// Wraps the loop in a new loop of extent one.
    pub fn add_unit_loop_over_loop(&mut self, loop_rv: LoopRV) -> ScheduleResult<LoopRV> {
        let path = self
            .func()
            .locate_loop(loop_rv)
            .ok_or(ScheduleError::UnknownLoop(loop_rv))?;
        let id = self.wrap_in_unit_loop(&path)?;
        self.record("add_unit_loop", format!("{loop_rv} -> {id}"));
        Ok(id)
    }

    fn wrap_in_unit_loop(&mut self, path: &[usize]) -> ScheduleResult<LoopId> {
        let id = self.func_mut().fresh_loop_id();
        let Some(&index) = path.last() else {
            return Err(ScheduleError::malformed("empty path"));
        };
        let siblings = self
            .func_mut()
            .siblings_mut(path)
            .ok_or_else(|| ScheduleError::malformed("statement has no parent"))?;
        let stmt = siblings.remove(index);
        siblings.insert(index, Stmt::Loop(Loop::new(id, 1, vec![stmt])));
        Ok(id)
    }

    /// Leaf blocks inside the statement at `path`.
    pub(crate) fn blocks_under(&self, path: &[usize]) -> Vec<BlockId> {
        self.func()
            .stmt(path)
            .map(|stmt| stmt.blocks())
            .unwrap_or_default()
    }

    /// Replaces a loop variable in the bindings and predicates of `blocks`,
    /// simplifying against the current loop ranges.
    pub(crate) fn rewrite_loop_vars(
        &mut self,
        blocks: &[BlockId],
        old: LoopId,
        replacement: &IndexExpr,
    ) {
        let ranges = self.loop_ranges();
        let lookup = Self::loop_bound_lookup(&ranges);
        let mut subst = |var: Var| match var {
            Var::Loop(id) if id == old => Some(replacement.clone()),
            _ => None,
        };
        for id in blocks {
            if let Some(block) = self.func_mut().block_mut(*id) {
                for iv in &mut block.iter_vars {
                    iv.binding = iv.binding.substitute(&mut subst).simplify(&lookup);
                }
                for predicate in &mut block.predicates {
                    predicate.expr = predicate.expr.substitute(&mut subst).simplify(&lookup);
                }
            }
        }
    }
}
