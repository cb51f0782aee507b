use std::collections::BTreeMap;

use crate::error::{ScheduleError, ScheduleResult};
use crate::index::{lv, IndexExpr, LinearForm, Var};
use crate::ir::{Block, BlockId, Loop, LoopId, Predicate, PrimFunc, Stmt};

use super::{BlockRV, LoopRV, Schedule};

/// Where a block can be computed relative to its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeLocation {
    /// Leave the block in its own loop nest under the root.
    Root,
    /// Inline the block into its consumers.
    Inline,
    /// Move the block under the given loop.
    Loop(LoopRV),
}

/// Accessed range of one buffer dimension under a loop: the loop-invariant
/// part `base` plus offsets in `[min, max]`. `None` means the whole dimension.
#[derive(Debug, Clone, PartialEq)]
struct DimRegion {
    base: LinearForm,
    min: i64,
    max: i64,
}

enum Anchor {
    BeforeFirst(Vec<BlockId>),
    AfterLast(Vec<BlockId>),
}

impl Schedule {
    /// Moves a producer under `loop_rv` so that it computes only the region
    /// its consumers read in one iteration of that loop.
    pub fn compute_at(&mut self, block: BlockRV, loop_rv: LoopRV) -> ScheduleResult<()> {
        let fail = |reason: &str| ScheduleError::cannot_compute_at(block, reason);
        let node = self.leaf_block(block)?;
        let Some(store) = &node.store else {
            return Err(fail("block has no store"));
        };
        let dims = distinct_plain(&store.target.indices)
            .ok_or_else(|| fail("written indices are not distinct iterators"))?;
        let written = store.target.buffer;
        let iter_dims = iter_to_dim(node.iter_vars.len(), &dims);
        self.check_not_enclosing(block, loop_rv)?;

        let consumers = self.get_consumers(block)?;
        if consumers.is_empty() {
            return Err(fail("block has no consumer"));
        }
        let scope = self.loop_stmt(loop_rv)?;
        let mut accesses = Vec::new();
        for consumer in &consumers {
            if !scope.contains_block(*consumer) {
                return Err(ScheduleError::cannot_compute_at(
                    block,
                    format!("consumer {consumer} is not under {loop_rv}"),
                ));
            }
            let reader = self.block(*consumer)?;
            for access in reader.loads_of(written) {
                accesses.push((*consumer, access.indices.clone()));
            }
        }
        let regions = self.footprint(loop_rv, &accesses, dims.len())?;
        let anchor = Anchor::BeforeFirst(consumers);
        self.relocate(block, loop_rv, &regions, &iter_dims, anchor)?;
        self.record("compute_at", format!("{block}, {loop_rv}"));
        Ok(())
    }

    /// Moves a consumer under `loop_rv` so that it consumes exactly the region
    /// its producer writes in one iteration of that loop.
    pub fn reverse_compute_at(&mut self, block: BlockRV, loop_rv: LoopRV) -> ScheduleResult<()> {
        let fail = |reason: &str| ScheduleError::cannot_compute_at(block, reason);
        let node = self.leaf_block(block)?;
        self.check_not_enclosing(block, loop_rv)?;
        let scope = self.loop_stmt(loop_rv)?;

        let mut staged: Option<(crate::ir::BufferId, Vec<BlockId>)> = None;
        for buffer in node.read_buffers() {
            let writers: Vec<BlockId> = self
                .func()
                .writers_of(buffer)
                .into_iter()
                .filter(|writer| *writer != block && scope.contains_block(*writer))
                .collect();
            if writers.is_empty() {
                continue;
            }
            if staged.is_some() {
                return Err(fail("more than one buffer is produced under the target loop"));
            }
            staged = Some((buffer, writers));
        }
        let Some((buffer, producers)) = staged else {
            return Err(ScheduleError::cannot_compute_at(
                block,
                format!("no producer of the block is under {loop_rv}"),
            ));
        };

        let loads = node.loads_of(buffer);
        let dims = loads
            .first()
            .and_then(|access| distinct_plain(&access.indices))
            .ok_or_else(|| fail("read indices are not distinct iterators"))?;
        let uniform = loads
            .iter()
            .all(|access| distinct_plain(&access.indices).as_ref() == Some(&dims));
        if !uniform {
            return Err(fail("buffer is read at different indices"));
        }
        let iter_dims = iter_to_dim(node.iter_vars.len(), &dims);

        let mut accesses = Vec::new();
        for producer in &producers {
            if let Some(store) = &self.block(*producer)?.store {
                accesses.push((*producer, store.target.indices.clone()));
            }
        }
        let regions = self.footprint(loop_rv, &accesses, dims.len())?;
        let anchor = Anchor::AfterLast(producers);
        self.relocate(block, loop_rv, &regions, &iter_dims, anchor)?;
        self.record("reverse_compute_at", format!("{block}, {loop_rv}"));
        Ok(())
    }

    /// Locations the block may legally be moved to: the root, inlined (when
    /// legal), and every loop enclosing all consumers where `compute_at`
    /// succeeds. Loops are listed outermost first.
    pub fn compute_location_candidates(
        &self,
        block: BlockRV,
    ) -> ScheduleResult<Vec<ComputeLocation>> {
        self.leaf_block(block)?;
        let mut out = vec![ComputeLocation::Root];
        if self.clone().compute_inline(block).is_ok() {
            out.push(ComputeLocation::Inline);
        }
        let consumers = self.get_consumers(block)?;
        let Some((first, rest)) = consumers.split_first() else {
            return Ok(out);
        };
        let own = self.get_loops(block)?;
        let mut shared = self.get_loops(*first)?;
        for consumer in rest {
            let loops = self.get_loops(*consumer)?;
            shared.retain(|l| loops.contains(l));
        }
        for loop_rv in shared.into_iter().filter(|l| !own.contains(l)) {
            if self.clone().compute_at(block, loop_rv).is_ok() {
                out.push(ComputeLocation::Loop(loop_rv));
            }
        }
        Ok(out)
    }

    pub fn apply_compute_location(
        &mut self,
        block: BlockRV,
        location: ComputeLocation,
    ) -> ScheduleResult<()> {
        match location {
            ComputeLocation::Root => Ok(()),
            ComputeLocation::Inline => self.compute_inline(block),
            ComputeLocation::Loop(loop_rv) => self.compute_at(block, loop_rv),
        }
    }

    fn check_not_enclosing(&self, block: BlockRV, loop_rv: LoopRV) -> ScheduleResult<()> {
        if self.get_loops(block)?.contains(&loop_rv) {
            return Err(ScheduleError::cannot_compute_at(
                block,
                format!("{loop_rv} already encloses the block"),
            ));
        }
        Ok(())
    }

    fn loop_stmt(&self, loop_rv: LoopRV) -> ScheduleResult<&Stmt> {
        self.func()
            .locate_loop(loop_rv)
            .and_then(|path| self.func().stmt(&path))
            .ok_or(ScheduleError::UnknownLoop(loop_rv))
    }

    /// Per-dimension region touched by `accesses` during one iteration of
    /// `loop_rv`. Loops enclosing `loop_rv` (and the loop itself) are fixed,
    /// loops below it sweep their full range.
    fn footprint(
        &self,
        loop_rv: LoopRV,
        accesses: &[(BlockId, Vec<IndexExpr>)],
        ndim: usize,
    ) -> ScheduleResult<Vec<Option<DimRegion>>> {
        let path = self
            .func()
            .locate_loop(loop_rv)
            .ok_or(ScheduleError::UnknownLoop(loop_rv))?;
        let mut fixed = self.func().loops_on_path(&path);
        fixed.push(loop_rv);
        let ranges = self.loop_ranges();

        let mut regions: Vec<Option<Option<DimRegion>>> = vec![None; ndim];
        for (block, indices) in accesses {
            let node = self.block(*block)?;
            let mut bind = |var: Var| match var {
                Var::Iter(i) => node.iter_vars.get(i).map(|iv| iv.binding.clone()),
                Var::Loop(_) => None,
            };
            for (dim, index) in indices.iter().enumerate().take(ndim) {
                let region = index
                    .substitute(&mut bind)
                    .linear()
                    .and_then(|form| split_fixed(&form, &fixed, &ranges));
                regions[dim] = Some(match (regions[dim].take(), region) {
                    (None, region) => region,
                    (Some(Some(prev)), Some(next)) if prev.base == next.base => Some(DimRegion {
                        base: prev.base,
                        min: prev.min.min(next.min),
                        max: prev.max.max(next.max),
                    }),
                    _ => None,
                });
            }
        }
        Ok(regions.into_iter().map(Option::flatten).collect())
    }

    /// Removes `block` from its loop nest and reinserts it under `loop_rv`
    /// inside fresh loops covering `regions`. Fails without touching the
    /// schedule when the new position breaks producer/consumer order.
    fn relocate(
        &mut self,
        block: BlockRV,
        loop_rv: LoopRV,
        regions: &[Option<DimRegion>],
        iter_dims: &[Option<usize>],
        anchor: Anchor,
    ) -> ScheduleResult<()> {
        let ranges = self.loop_ranges();
        let mut func = self.func().clone();
        let path = func
            .locate_block(block)
            .ok_or(ScheduleError::UnknownBlock(block))?;
        let Some(Stmt::Block(mut node)) = func.remove_stmt(&path) else {
            return Err(ScheduleError::UnknownBlock(block));
        };
        if func.locate_loop(loop_rv).is_none() {
            return Err(ScheduleError::cannot_compute_at(
                block,
                format!("{loop_rv} only encloses the block itself"),
            ));
        }
        let nest = build_nest(&mut func, &mut node, regions, iter_dims, &ranges);

        let body = &mut func
            .for_loop_mut(loop_rv)
            .ok_or(ScheduleError::UnknownLoop(loop_rv))?
            .body;
        let position = match &anchor {
            Anchor::BeforeFirst(blocks) => body
                .iter()
                .position(|stmt| blocks.iter().any(|b| stmt.contains_block(*b))),
            Anchor::AfterLast(blocks) => body
                .iter()
                .rposition(|stmt| blocks.iter().any(|b| stmt.contains_block(*b)))
                .map(|index| index + 1),
        }
        .ok_or_else(|| ScheduleError::cannot_compute_at(block, "anchor blocks vanished"))?;
        body.insert(position, nest);

        if !dataflow_ordered(&func, block) {
            return Err(ScheduleError::cannot_compute_at(
                block,
                "new position breaks producer-consumer order",
            ));
        }
        *self.func_mut() = func;
        Ok(())
    }
}

/// Distinct block iterators used as whole indices.
fn distinct_plain(indices: &[IndexExpr]) -> Option<Vec<usize>> {
    let mut out: Vec<usize> = Vec::with_capacity(indices.len());
    for index in indices {
        match index.as_var() {
            Some(Var::Iter(i)) if !out.contains(&i) => out.push(i),
            _ => return None,
        }
    }
    Some(out)
}

fn iter_to_dim(iters: usize, dims: &[usize]) -> Vec<Option<usize>> {
    (0..iters)
        .map(|iter| dims.iter().position(|d| *d == iter))
        .collect()
}

/// Splits an affine index into the part fixed by the enclosing loops and the
/// offset range swept by the others.
fn split_fixed(
    form: &LinearForm,
    fixed: &[LoopId],
    ranges: &BTreeMap<LoopId, (i64, i64)>,
) -> Option<DimRegion> {
    let mut base = LinearForm::default();
    let (mut min, mut max) = (form.constant, form.constant);
    for (var, coeff) in &form.terms {
        let Var::Loop(id) = var else {
            return None;
        };
        if fixed.contains(id) {
            base.terms.insert(*var, *coeff);
            continue;
        }
        let (lo, hi) = ranges.get(id).copied()?;
        let (a, b) = (lo * coeff, hi * coeff);
        min += a.min(b);
        max += a.max(b);
    }
    Some(DimRegion { base, min, max })
}

/// Wraps `node` in one new loop per iterator and rebinds its iterators so
/// that mapped dimensions cover `regions`.
fn build_nest(
    func: &mut PrimFunc,
    node: &mut Block,
    regions: &[Option<DimRegion>],
    iter_dims: &[Option<usize>],
    ranges: &BTreeMap<LoopId, (i64, i64)>,
) -> Stmt {
    let mut loops = Vec::with_capacity(node.iter_vars.len());
    let mut extents = BTreeMap::new();
    node.predicates.clear();
    for (iter, iv) in node.iter_vars.iter_mut().enumerate() {
        let id = func.fresh_loop_id();
        let region = iter_dims[iter].and_then(|dim| regions.get(dim).cloned().flatten());
        let (base, extent) = match region {
            Some(region) if region.base.terms.is_empty() => {
                let start = region.min.max(0);
                let end = region.max.min(iv.extent - 1);
                (IndexExpr::Const(start), (end - start + 1).max(1))
            }
            Some(region) => {
                let offset = LinearForm {
                    terms: region.base.terms.clone(),
                    constant: region.min,
                };
                (offset.to_expr(), (region.max - region.min + 1).min(iv.extent))
            }
            None => (IndexExpr::Const(0), iv.extent),
        };
        extents.insert(id, (0, extent - 1));
        iv.binding = base.add(lv(id));
        loops.push((id, extent));
    }

    let lookup = |var: Var| match var {
        Var::Loop(id) => extents.get(&id).or_else(|| ranges.get(&id)).copied(),
        Var::Iter(_) => None,
    };
    for iv in &node.iter_vars {
        if let Some((_, hi)) = iv.binding.bounds(&lookup) {
            if hi >= iv.extent {
                node.predicates.push(Predicate {
                    expr: iv.binding.clone(),
                    bound: iv.extent,
                });
            }
        }
    }

    let mut stmt = Stmt::Block(node.clone());
    for (id, extent) in loops.into_iter().rev() {
        stmt = Stmt::Loop(Loop::new(id, extent, vec![stmt]));
    }
    stmt
}

/// Every producer of `block` precedes it and every consumer follows it.
fn dataflow_ordered(func: &PrimFunc, block: BlockId) -> bool {
    let order: BTreeMap<BlockId, usize> = func
        .leaf_blocks()
        .into_iter()
        .enumerate()
        .map(|(index, node)| (node.id, index))
        .collect();
    let (Some(node), Some(position)) = (func.block(block), order.get(&block)) else {
        return false;
    };
    let before = |other: &BlockId| order.get(other).is_some_and(|p| p < position);
    let after = |other: &BlockId| order.get(other).is_some_and(|p| p > position);
    for buffer in node.read_buffers() {
        let writers = func.writers_of(buffer);
        if !writers.iter().filter(|w| **w != block).all(before) {
            return false;
        }
    }
    match node.write_buffer() {
        Some(buffer) => func
            .readers_of(buffer)
            .iter()
            .filter(|r| **r != block)
            .all(after),
        None => true,
    }
}
