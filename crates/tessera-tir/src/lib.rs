//! Loop-nest IR and schedule primitives.
//!
//! A [`PrimFunc`] is a tree of loops and blocks under a root block. Each leaf
//! block performs one store per point of its iteration space; its iterators
//! are bound to expressions over the enclosing loops. A [`Schedule`] wraps a
//! function and exposes the transformations (split, fuse, reorder, caching,
//! compute-at, inlining, rfactor, tensorization) together with the sampling
//! primitives that make a schedule a point in a design space.

pub mod builder;
pub mod error;
pub mod expr;
pub mod index;
pub mod intrin;
pub mod ir;
pub mod schedule;
mod text;

pub use builder::{BlockBuilder, FuncBuilder};
pub use error::{ScheduleError, ScheduleResult};
pub use expr::{Access, BinaryOp, Expr, ReduceKind, Store, UnaryOp};
pub use index::{iv, lv, IndexExpr, Var};
pub use intrin::{IntrinRegistry, IntrinRole, TensorIntrin};
pub use ir::{
    AnnValue, Annotations, Block, BlockId, Buffer, BufferId, DType, ForKind, IterKind, IterVar,
    Loop, LoopId, PrimFunc, Stmt,
};
pub use schedule::{BlockRV, ComputeLocation, Instruction, LoopRV, Schedule};

// Re-export linkme so downstream crates can add intrinsic registrars.
pub use linkme;
