//! Rule-based design-space generation for tensor programs.
//!
//! A [`ScheduleRule`] inspects one block of a [`Schedule`](tessera_tir::Schedule) and proposes
//! transformed variants of it: inlining, multi-level tiling, reduction
//! factorization, thread binding, lowering hints. Target families get a
//! default rule pipeline from [`defaults`], and [`PostOrderApply`] applies
//! a pipeline to every block of a function to enumerate its design space.
//!
//! The loop-nest IR and the schedule primitives the rules are written
//! against live in [`tessera_tir`].

pub mod attr;
pub mod context;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod rule;
pub mod space;
pub mod target;
mod env;

pub use tessera_tir;

pub use context::TuneContext;
pub use defaults::{
    default_arm, default_cuda, default_cuda_tensor_core, default_hexagon, default_llvm,
    default_micro, default_rules, default_x86, RuleList,
};
pub use error::{RuleError, RuleResult};
pub use pipeline::{assemble, RulePipelineBuilder, TargetRules};
pub use rule::{is_apply_custom_rule, ScheduleRule};
pub use space::{BlockFilter, PostOrderApply};
pub use target::Target;
