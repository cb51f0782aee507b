use crate::error::{ScheduleError, ScheduleResult};
use crate::expr::{Access, Expr, Store};
use crate::index::{iv, lv, IndexExpr};
use crate::ir::{Annotations, Block, Buffer, BufferId, IterKind, IterVar, Loop, Stmt};

use super::{BlockRV, Schedule};

impl Schedule {
    /// Stages the `read_index`-th buffer read by `block` through a new buffer
    /// in `scope`. The copy block is placed at the root, right before the
    /// loop nest holding `block`; loads in `block` and in every listed
    /// consumer are redirected to the new buffer.
    pub fn cache_read(
        &mut self,
        block: BlockRV,
        read_index: usize,
        scope: &str,
        consumers: &[BlockRV],
    ) -> ScheduleResult<BlockRV> {
        let node = self.leaf_block(block)?;
        let source = *node
            .read_buffers()
            .get(read_index)
            .ok_or(ScheduleError::ReadIndexOutOfRange {
                block,
                index: read_index,
            })?;
        let top = self.top_level_index(block)?;
        let nest = &self.func().root.children[top];
        for writer in self.func().writers_of(source) {
            if nest.contains_block(writer) {
                return Err(ScheduleError::cannot_cache(
                    block,
                    "the cached buffer is written inside the consumer's loop nest",
                ));
            }
        }
        for consumer in consumers {
            if !self.block(*consumer)?.read_buffers().contains(&source) {
                return Err(ScheduleError::cannot_cache(
                    *consumer,
                    "listed consumer does not read the cached buffer",
                ));
            }
        }

        let (staged, copy) = self.stage_buffer(source, scope)?;
        let copy_block = self.copy_block(&copy.0, source, staged)?;
        let copy_id = copy_block.id;
        let nest = self.copy_nest(copy_block, &copy.1);

        let mut targets = vec![block];
        targets.extend(consumers.iter().copied().filter(|c| *c != block));
        for target in targets {
            if let Some(node) = self.func_mut().block_mut(target) {
                if let Some(store) = &mut node.store {
                    store.value = redirect_loads(&store.value, source, staged);
                }
            }
        }
        self.func_mut().root.children.insert(top, nest);
        self.record(
            "cache_read",
            format!("{block}, {read_index}, {scope:?} -> {copy_id}"),
        );
        Ok(copy_id)
    }

    /// Makes `block` write a new buffer in `scope` and copies it back to the
    /// original buffer in a block placed after the loop nest of `block`.
    pub fn cache_write(
        &mut self,
        block: BlockRV,
        write_index: usize,
        scope: &str,
    ) -> ScheduleResult<BlockRV> {
        let node = self.leaf_block(block)?;
        if write_index != 0 {
            return Err(ScheduleError::WriteIndexOutOfRange {
                block,
                index: write_index,
            });
        }
        let target = node
            .write_buffer()
            .ok_or(ScheduleError::WriteIndexOutOfRange { block, index: 0 })?;
        let top = self.top_level_index(block)?;
        let nest = &self.func().root.children[top];
        for reader in self.func().readers_of(target) {
            if reader != block && nest.contains_block(reader) {
                return Err(ScheduleError::cannot_cache(
                    block,
                    "the written buffer is read inside the same loop nest",
                ));
            }
        }

        let (staged, copy) = self.stage_buffer(target, scope)?;
        if let Some(node) = self.func_mut().block_mut(block) {
            if let Some(store) = &mut node.store {
                store.target.buffer = staged;
            }
        }
        let copy_block = self.copy_block(&copy.0, staged, target)?;
        let copy_id = copy_block.id;
        let nest = self.copy_nest(copy_block, &copy.1);
        self.func_mut().root.children.insert(top + 1, nest);
        self.record(
            "cache_write",
            format!("{block}, {write_index}, {scope:?} -> {copy_id}"),
        );
        Ok(copy_id)
    }

    /// Changes the storage scope of the buffer written by `block`.
    pub fn set_scope(
        &mut self,
        block: BlockRV,
        write_index: usize,
        scope: &str,
    ) -> ScheduleResult<()> {
        let buffer = self
            .leaf_block(block)?
            .write_buffer()
            .filter(|_| write_index == 0)
            .ok_or(ScheduleError::WriteIndexOutOfRange {
                block,
                index: write_index,
            })?;
        let entry = self
            .func_mut()
            .buffers
            .get_mut(&buffer)
            .ok_or(ScheduleError::UnknownBuffer(buffer))?;
        entry.scope = scope.to_string();
        self.record("set_scope", format!("{block}, {write_index}, {scope:?}"));
        Ok(())
    }

    /// Index of the root child that contains `block`.
    pub(crate) fn top_level_index(&self, block: BlockRV) -> ScheduleResult<usize> {
        self.func()
            .locate_block(block)
            .and_then(|path| path.first().copied())
            .ok_or(ScheduleError::UnknownBlock(block))
    }

    /// Allocates a copy of `source` in `scope`. Returns the new buffer with
    /// the copy block's name and the buffer shape.
    fn stage_buffer(
        &mut self,
        source: BufferId,
        scope: &str,
    ) -> ScheduleResult<(BufferId, (String, Vec<i64>))> {
        let original = self
            .func()
            .buffer(source)
            .cloned()
            .ok_or(ScheduleError::UnknownBuffer(source))?;
        let base = format!("{}_{}", original.name, scope.replace('.', "_"));
        let name = self.func().unique_buffer_name(&base);
        let block_name = self.func().unique_block_name(&base);
        let shape = original.shape.clone();
        let staged = self.func_mut().add_buffer(Buffer {
            name,
            shape: shape.clone(),
            dtype: original.dtype,
            scope: scope.to_string(),
        });
        Ok((staged, (block_name, shape)))
    }

    fn copy_block(&mut self, name: &str, from: BufferId, to: BufferId) -> ScheduleResult<Block> {
        let shape = self
            .func()
            .buffer(to)
            .map(|buffer| buffer.shape.clone())
            .ok_or(ScheduleError::UnknownBuffer(to))?;
        let id = self.func_mut().fresh_block_id();
        let indices: Vec<_> = (0..shape.len()).map(iv).collect();
        Ok(Block {
            id,
            name: name.to_string(),
            iter_vars: shape
                .iter()
                .map(|extent| IterVar {
                    kind: IterKind::Spatial,
                    extent: *extent,
                    binding: IndexExpr::Const(0),
                })
                .collect(),
            store: Some(Store::assign(
                Access::new(to, indices.clone()),
                Expr::load(from, indices),
            )),
            predicates: Vec::new(),
            annotations: Annotations::new(),
            children: Vec::new(),
        })
    }

    /// Wraps a copy block in one loop per dimension and binds its iterators.
    fn copy_nest(&mut self, mut block: Block, shape: &[i64]) -> Stmt {
        let ids: Vec<_> = shape
            .iter()
            .map(|_| self.func_mut().fresh_loop_id())
            .collect();
        for (iter, id) in block.iter_vars.iter_mut().zip(&ids) {
            iter.binding = lv(*id);
        }
        let mut stmt = Stmt::Block(block);
        for (id, extent) in ids.iter().zip(shape).rev() {
            stmt = Stmt::Loop(Loop::new(*id, *extent, vec![stmt]));
        }
        stmt
    }
}

fn redirect_loads(value: &Expr, from: BufferId, to: BufferId) -> Expr {
    value.replace_loads(&mut |access| {
        (access.buffer == from).then(|| Expr::Load(Access::new(to, access.indices.clone())))
    })
}

