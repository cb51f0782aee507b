use thiserror::Error;

use crate::ir::{BlockId, BufferId, LoopId};

/// Errors raised by schedule primitives and structural queries.
///
/// A primitive that returns an error leaves the schedule untouched; callers
/// probing for legality can therefore retry other transformations on the same
/// schedule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("block {0} does not exist in the schedule")]
    UnknownBlock(BlockId),
    #[error("loop {0} does not exist in the schedule")]
    UnknownLoop(LoopId),
    #[error("buffer {0} does not exist in the function")]
    UnknownBuffer(BufferId),
    #[error("no block named `{0}`")]
    BlockNameNotFound(String),
    #[error("block {0} is the root block")]
    RootBlock(BlockId),
    #[error("block {0} is not a leaf block")]
    NotLeaf(BlockId),
    #[error("block {block} has no read buffer at index {index}")]
    ReadIndexOutOfRange { block: BlockId, index: usize },
    #[error("block {block} has no write buffer at index {index}")]
    WriteIndexOutOfRange { block: BlockId, index: usize },
    #[error("invalid split factors for loop {loop_id} of extent {extent}: {reason}")]
    InvalidFactors {
        loop_id: LoopId,
        extent: i64,
        reason: String,
    },
    #[error("loops do not form a single chain: {0}")]
    NotAChain(String),
    #[error("cannot inline block {block}: {reason}")]
    CannotInline { block: BlockId, reason: String },
    #[error("cannot move block {block}: {reason}")]
    CannotComputeAt { block: BlockId, reason: String },
    #[error("cannot create cache stage for block {block}: {reason}")]
    CannotCache { block: BlockId, reason: String },
    #[error("cannot rfactor loop {loop_id}: {reason}")]
    CannotRFactor { loop_id: LoopId, reason: String },
    #[error("unknown tensor intrinsic `{0}`")]
    UnknownIntrin(String),
    #[error("cannot tensorize loop {loop_id} with `{intrin}`: {reason}")]
    CannotTensorize {
        loop_id: LoopId,
        intrin: String,
        reason: String,
    },
    #[error("invalid sampling request: {0}")]
    InvalidSample(String),
    #[error("malformed schedule: {0}")]
    Malformed(String),
}

impl ScheduleError {
    pub fn cannot_inline(block: BlockId, reason: impl Into<String>) -> Self {
        ScheduleError::CannotInline {
            block,
            reason: reason.into(),
        }
    }

    pub fn cannot_compute_at(block: BlockId, reason: impl Into<String>) -> Self {
        ScheduleError::CannotComputeAt {
            block,
            reason: reason.into(),
        }
    }

    pub fn cannot_cache(block: BlockId, reason: impl Into<String>) -> Self {
        ScheduleError::CannotCache {
            block,
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        ScheduleError::Malformed(reason.into())
    }
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;
