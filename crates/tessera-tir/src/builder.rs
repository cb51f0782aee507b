//! Convenience construction of [`PrimFunc`]s.
//!
//! Every block gets its own perfect loop nest, one loop per iterator, with
//! each iterator bound directly to its loop. This is the canonical form the
//! schedule rules start from.

use crate::error::{ScheduleError, ScheduleResult};
use crate::expr::{Access, Expr, ReduceKind, Store};
use crate::index::{lv, IndexExpr};
use crate::ir::{
    AnnValue, Annotations, Block, BlockId, Buffer, BufferId, DType, IterKind, IterVar, Loop,
    PrimFunc, Stmt,
};

pub struct FuncBuilder {
    func: PrimFunc,
}

impl FuncBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            func: PrimFunc::new(name),
        }
    }

    /// Declares a parameter the function reads.
    pub fn input(&mut self, name: &str, shape: &[i64], dtype: DType) -> BufferId {
        let id = self.buffer(name, shape, dtype);
        self.func.params.push(id);
        id
    }

    /// Declares a parameter the function writes.
    pub fn output(&mut self, name: &str, shape: &[i64], dtype: DType) -> BufferId {
        self.input(name, shape, dtype)
    }

    /// Declares an intermediate buffer.
    pub fn alloc(&mut self, name: &str, shape: &[i64], dtype: DType) -> BufferId {
        self.buffer(name, shape, dtype)
    }

    fn buffer(&mut self, name: &str, shape: &[i64], dtype: DType) -> BufferId {
        self.func.add_buffer(Buffer {
            name: name.to_string(),
            shape: shape.to_vec(),
            dtype,
            scope: "global".to_string(),
        })
    }

    pub fn block(&mut self, name: &str) -> BlockBuilder<'_> {
        BlockBuilder {
            owner: self,
            name: name.to_string(),
            iters: Vec::new(),
            store: None,
            annotations: Annotations::new(),
        }
    }

    pub fn finish(self) -> PrimFunc {
        self.func
    }
}

pub struct BlockBuilder<'a> {
    owner: &'a mut FuncBuilder,
    name: String,
    iters: Vec<(IterKind, i64)>,
    store: Option<Store>,
    annotations: Annotations,
}

impl<'a> BlockBuilder<'a> {
    pub fn spatial(mut self, extent: i64) -> Self {
        self.iters.push((IterKind::Spatial, extent));
        self
    }

    pub fn reduce(mut self, extent: i64) -> Self {
        self.iters.push((IterKind::Reduce, extent));
        self
    }

    /// `buffer[indices] = value`
    pub fn store(mut self, buffer: BufferId, indices: Vec<IndexExpr>, value: Expr) -> Self {
        self.store = Some(Store::assign(Access::new(buffer, indices), value));
        self
    }

    /// `buffer[indices] <reducer>= value`
    pub fn accumulate(
        mut self,
        buffer: BufferId,
        indices: Vec<IndexExpr>,
        reducer: ReduceKind,
        value: Expr,
    ) -> Self {
        self.store = Some(Store::reduce(Access::new(buffer, indices), reducer, value));
        self
    }

    pub fn annotate(mut self, key: &str, value: impl Into<AnnValue>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    /// Appends the block, wrapped in its loop nest, to the function body.
    pub fn finish(self) -> ScheduleResult<BlockId> {
        let store = self
            .store
            .ok_or_else(|| ScheduleError::malformed(format!("block {} has no store", self.name)))?;
        let func = &mut self.owner.func;
        let accesses = std::iter::once(&store.target).chain(store.value.loads());
        for access in accesses {
            let buffer = func
                .buffer(access.buffer)
                .ok_or(ScheduleError::UnknownBuffer(access.buffer))?;
            if buffer.ndim() != access.indices.len() {
                return Err(ScheduleError::malformed(format!(
                    "block {} indexes {} with {} indices",
                    self.name,
                    buffer.name,
                    access.indices.len()
                )));
            }
        }

        let id = func.fresh_block_id();
        let loops: Vec<_> = self.iters.iter().map(|_| func.fresh_loop_id()).collect();
        let block = Block {
            id,
            name: self.name,
            iter_vars: self
                .iters
                .iter()
                .zip(&loops)
                .map(|((kind, extent), loop_id)| IterVar {
                    kind: *kind,
                    extent: *extent,
                    binding: lv(*loop_id),
                })
                .collect(),
            store: Some(store),
            predicates: Vec::new(),
            annotations: self.annotations,
            children: Vec::new(),
        };
        let mut stmt = Stmt::Block(block);
        for (loop_id, (_, extent)) in loops.iter().zip(&self.iters).rev() {
            stmt = Stmt::Loop(Loop::new(*loop_id, *extent, vec![stmt]));
        }
        func.root.children.push(stmt);
        Ok(id)
    }
}
