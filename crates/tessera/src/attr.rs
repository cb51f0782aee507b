//! Annotation keys written and read by schedule rules.
//!
//! Keys under `meta_schedule.` are advisory marks for later stages of the
//! tuning pipeline (post-processors, the code generator) or bookkeeping
//! between rules.

/// Tiling structure a block was tiled with; tiled blocks are skipped by
/// later tiling, reduction and compute-location rules.
pub const TILING_STRUCTURE: &str = "meta_schedule.tiling_structure";
/// Name of the compute or data-movement intrinsic a block is tensorized with.
pub const AUTO_TENSORIZE: &str = "meta_schedule.auto_tensorize";
/// Name of the accumulator initialization intrinsic.
pub const AUTO_TENSORIZE_INIT: &str = "meta_schedule.auto_tensorize_init";
/// Vector length for cooperative fetching of a shared-memory cache.
pub const COOPERATIVE_FETCH: &str = "meta_schedule.cooperative_fetch";
/// Asks `RandomComputeLocation` to also place the single producer of a block.
pub const RANDOM_COMPUTE_PRODUCER: &str = "meta_schedule.random_compute_producer";
/// An integer `0` forbids automatic inlining of a block.
pub const INLINE_RULE: &str = "meta_schedule.inline_rule";
/// Forces write reuse at the listed tile levels.
pub const WRITE_CACHE_LEVEL: &str = "meta_schedule.write_cache_level";
pub const THREAD_EXTENT_LOW_INCLUSIVE: &str = "meta_schedule.thread_extent_low_inclusive";
pub const THREAD_EXTENT_HIGH_INCLUSIVE: &str = "meta_schedule.thread_extent_high_inclusive";

pub const PARALLEL: &str = "meta_schedule.parallel";
pub const VECTORIZE: &str = "meta_schedule.vectorize";
pub const UNROLL_EXPLICIT: &str = "meta_schedule.unroll_explicit";
pub const UNROLL_IMPLICIT: &str = "meta_schedule.unroll_implicit";

pub const SOFTWARE_PIPELINE_STAGE: &str = "software_pipeline_stage";
pub const SOFTWARE_PIPELINE_ORDER: &str = "software_pipeline_order";

/// Name of a custom rule registered for the block; `"None"` leaves the block
/// unscheduled.
pub const SCHEDULE_RULE: &str = "schedule_rule";
