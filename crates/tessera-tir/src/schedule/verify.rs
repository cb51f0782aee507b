use std::collections::BTreeSet;

use crate::error::{ScheduleError, ScheduleResult};
use crate::index::Var;
use crate::ir::{BlockId, LoopId, PrimFunc, Stmt};

use super::Schedule;

impl Schedule {
    /// Checks structural well-formedness of the scheduled function.
    pub fn verify(&self) -> ScheduleResult<()> {
        verify_func(self.func())
    }
}

pub(crate) fn verify_func(func: &PrimFunc) -> ScheduleResult<()> {
    let mut blocks = BTreeSet::new();
    let mut loops = BTreeSet::new();
    let mut stack: Vec<(LoopId, i64)> = Vec::new();
    for stmt in &func.root.children {
        walk(func, stmt, &mut stack, &mut blocks, &mut loops)?;
    }

    let order: Vec<BlockId> = func.leaf_blocks().iter().map(|block| block.id).collect();
    for (position, id) in order.iter().enumerate() {
        let Some(block) = func.block(*id) else {
            continue;
        };
        for buffer in block.read_buffers() {
            for writer in func.writers_of(buffer) {
                let writer_pos = order.iter().position(|b| *b == writer).unwrap_or(0);
                if writer != *id && writer_pos > position {
                    return Err(ScheduleError::malformed(format!(
                        "block {} reads {buffer} before {writer} writes it",
                        block.name
                    )));
                }
            }
        }
    }
    Ok(())
}

fn walk(
    func: &PrimFunc,
    stmt: &Stmt,
    stack: &mut Vec<(LoopId, i64)>,
    blocks: &mut BTreeSet<BlockId>,
    loops: &mut BTreeSet<LoopId>,
) -> ScheduleResult<()> {
    match stmt {
        Stmt::Loop(lp) => {
            if !loops.insert(lp.id) {
                return Err(ScheduleError::malformed(format!("loop {} appears twice", lp.id)));
            }
            if lp.extent <= 0 {
                return Err(ScheduleError::malformed(format!(
                    "loop {} has extent {}",
                    lp.id,
                    lp.extent
                )));
            }
            stack.push((lp.id, lp.extent));
            for child in &lp.body {
                walk(func, child, stack, blocks, loops)?;
            }
            stack.pop();
            Ok(())
        }
        Stmt::Block(block) => {
            if !blocks.insert(block.id) || block.id == func.root.id {
                return Err(ScheduleError::malformed(format!("block {} appears twice", block.id)));
            }
            let Some(store) = &block.store else {
                return Err(ScheduleError::malformed(format!("block {} has no store", block.name)));
            };
            let range = |var: Var| match var {
                Var::Loop(id) => stack
                    .iter()
                    .find(|(l, _)| *l == id)
                    .map(|(_, extent)| (0, extent - 1)),
                Var::Iter(_) => None,
            };
            let guarded = !block.predicates.is_empty();
            for (i, iv) in block.iter_vars.iter().enumerate() {
                let Some((lo, hi)) = iv.binding.bounds(&range) else {
                    return Err(ScheduleError::malformed(format!(
                        "iterator {i} of block {} is bound outside its loop nest",
                        block.name
                    )));
                };
                if lo < 0 || (hi >= iv.extent && !guarded) {
                    return Err(ScheduleError::malformed(format!(
                        "iterator {i} of block {} ranges over [{lo}, {hi}] but has extent {}",
                        block.name, iv.extent
                    )));
                }
            }
            let accesses = std::iter::once(&store.target).chain(store.value.loads());
            for access in accesses {
                let buffer = func
                    .buffer(access.buffer)
                    .ok_or(ScheduleError::UnknownBuffer(access.buffer))?;
                if buffer.ndim() != access.indices.len() {
                    return Err(ScheduleError::malformed(format!(
                        "block {} accesses {} with {} indices",
                        block.name,
                        buffer.name,
                        access.indices.len()
                    )));
                }
            }
            Ok(())
        }
    }
}
