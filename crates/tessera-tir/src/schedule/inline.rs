use crate::error::{ScheduleError, ScheduleResult};
use crate::expr::{Access, Expr};
use crate::index::{IndexExpr, Var};
use crate::ir::BufferId;

use super::{BlockRV, Schedule};

impl Schedule {
    /// Inlines a spatial producer into every block that reads its output and
    /// removes it together with its buffer.
    pub fn compute_inline(&mut self, block: BlockRV) -> ScheduleResult<()> {
        let node = self.leaf_block(block)?;
        let fail = |reason: &str| ScheduleError::cannot_inline(block, reason);
        if !node.is_spatial() {
            return Err(fail("block is not spatial"));
        }
        if self.is_output_block(block)? {
            return Err(fail("block writes a function output"));
        }
        let Some(store) = &node.store else {
            return Err(fail("block has no store"));
        };
        let written = store.target.buffer;
        let dims = store
            .target
            .plain_iters()
            .ok_or_else(|| fail("written indices are not plain iterators"))?;
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].contains(dim) {
                return Err(fail("an iterator is written at two indices"));
            }
        }
        for (iter, iv) in node.iter_vars.iter().enumerate() {
            if iv.extent > 1 && !dims.contains(&iter) {
                return Err(fail("an iterator does not appear in the written indices"));
            }
        }
        let loads = store.value.loads();
        if loads.iter().any(|access| access.buffer == written) {
            return Err(fail("block reads its own output"));
        }
        if self.func().writers_of(written).len() != 1 {
            return Err(fail("buffer has more than one writer"));
        }
        let consumers = self.get_consumers(block)?;
        if consumers.is_empty() {
            return Err(fail("block has no consumer"));
        }

        let value = store.value.clone();
        let iters = node.iter_vars.len();
        let inline = |access: &Access| -> Option<Expr> {
            if access.buffer != written {
                return None;
            }
            let mut subst = |var: Var| match var {
                Var::Iter(i) if i < iters => Some(
                    dims.iter()
                        .position(|d| *d == i)
                        .and_then(|dim| access.indices.get(dim).cloned())
                        .unwrap_or(IndexExpr::Const(0)),
                ),
                _ => None,
            };
            Some(value.substitute(&mut subst))
        };
        let mut rewritten = Vec::with_capacity(consumers.len());
        for consumer in &consumers {
            if let Some(store) = &self.block(*consumer)?.store {
                let value = store.value.replace_loads(&mut |access| inline(access));
                rewritten.push((*consumer, value));
            }
        }

        for (consumer, value) in rewritten {
            if let Some(node) = self.func_mut().block_mut(consumer) {
                if let Some(store) = &mut node.store {
                    store.value = value;
                }
            }
        }
        self.remove_block(block, written)?;
        self.record("compute_inline", format!("{block}"));
        Ok(())
    }

    /// Folds a spatial consumer into its only producer. The producer then
    /// writes the consumer's output directly and the consumer disappears
    /// together with the intermediate buffer.
    pub fn reverse_compute_inline(&mut self, block: BlockRV) -> ScheduleResult<()> {
        let node = self.leaf_block(block)?;
        let fail = |reason: &str| ScheduleError::cannot_inline(block, reason);
        if !node.is_spatial() {
            return Err(fail("block is not spatial"));
        }
        let Some(store) = &node.store else {
            return Err(fail("block has no store"));
        };

        let produced: Vec<BufferId> = node
            .read_buffers()
            .into_iter()
            .filter(|buffer| !self.func().writers_of(*buffer).is_empty())
            .collect();
        let [staged] = produced.as_slice() else {
            return Err(fail("block must read exactly one produced buffer"));
        };
        let staged = *staged;
        if self.func().is_param(staged) {
            return Err(fail("intermediate buffer is a function parameter"));
        }
        let writers = self.func().writers_of(staged);
        let [producer] = writers.as_slice() else {
            return Err(fail("intermediate buffer has more than one writer"));
        };
        let producer = *producer;
        if self.func().readers_of(staged) != vec![block] {
            return Err(fail("intermediate buffer has other readers"));
        }

        let loads = node.loads_of(staged);
        let Some(first) = loads.first() else {
            return Err(fail("block does not load the intermediate buffer"));
        };
        if loads.iter().any(|access| access.indices != first.indices) {
            return Err(fail("intermediate buffer is read at different indices"));
        }
        let dims = first
            .plain_iters()
            .ok_or_else(|| fail("read indices are not plain iterators"))?;
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].contains(dim) {
                return Err(fail("an iterator is read at two indices"));
            }
        }
        for (iter, iv) in node.iter_vars.iter().enumerate() {
            if iv.extent > 1 && !dims.contains(&iter) {
                return Err(fail("an iterator does not appear in the read indices"));
            }
        }

        let source = self.leaf_block(producer)?;
        let Some(source_store) = source.store.as_ref().filter(|_| source.is_spatial()) else {
            return Err(fail("producer is not spatial"));
        };
        let written = &source_store.target.indices;
        let mut subst = |var: Var| match var {
            Var::Iter(i) => Some(
                dims.iter()
                    .position(|d| *d == i)
                    .and_then(|dim| written.get(dim).cloned())
                    .unwrap_or(IndexExpr::Const(0)),
            ),
            Var::Loop(_) => None,
        };
        let target = store.target.substitute(&mut subst);
        let produced = &source_store.value;
        let value = store
            .value
            .replace_loads(&mut |access| (access.buffer == staged).then(|| produced.clone()))
            .substitute(&mut subst);

        if let Some(node) = self.func_mut().block_mut(producer) {
            if let Some(store) = &mut node.store {
                store.target = target;
                store.value = value;
            }
        }
        self.remove_block(block, staged)?;
        self.record("reverse_compute_inline", format!("{block}"));
        Ok(())
    }

    /// Removes a block and a buffer that no other block uses anymore.
    fn remove_block(&mut self, block: BlockRV, buffer: BufferId) -> ScheduleResult<()> {
        let path = self
            .func()
            .locate_block(block)
            .ok_or(ScheduleError::UnknownBlock(block))?;
        self.func_mut().remove_stmt(&path);
        let func = self.func_mut();
        let unused = func.writers_of(buffer).is_empty() && func.readers_of(buffer).is_empty();
        if unused && !func.is_param(buffer) {
            func.buffers.remove(&buffer);
        }
        Ok(())
    }
}
