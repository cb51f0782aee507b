//! Block classification shared by several rules.

use tessera_tir::{BlockRV, IterKind, LoopRV, Schedule, ScheduleError, ScheduleResult, Var};

use crate::attr;

pub(crate) fn is_tiled(sch: &Schedule, block: BlockRV) -> bool {
    sch.block_annotation(block, attr::TILING_STRUCTURE)
        .is_some()
}

/// Whether the block is worth tiling: a non-spatial leaf with one write,
/// some reads and a trivial binding, where at least one spatial iterator is
/// missing from the indices of some read. Such an iterator means the read is
/// reused across it, which is what tiling exploits.
pub(crate) fn needs_multi_level_tiling(sch: &Schedule, block: BlockRV) -> bool {
    if is_tiled(sch, block) {
        return false;
    }
    let Ok(node) = sch.block(block) else {
        return false;
    };
    let Some(written) = node.write_buffer() else {
        return false;
    };
    if !node.is_leaf() || node.is_spatial() {
        return false;
    }
    let reads = node.read_buffers();
    if reads.is_empty() || !sch.is_trivial_binding(block).unwrap_or(false) {
        return false;
    }
    let spatial: Vec<usize> = node
        .iter_vars
        .iter()
        .enumerate()
        .filter(|(_, iv)| iv.kind == IterKind::Spatial && iv.extent != 1)
        .map(|(i, _)| i)
        .collect();
    let mut unused = 0;
    for buffer in reads.into_iter().filter(|buffer| *buffer != written) {
        let accesses = node.loads_of(buffer);
        unused += spatial
            .iter()
            .filter(|i| {
                let var = Var::Iter(**i);
                !accesses
                    .iter()
                    .any(|access| access.indices.iter().any(|index| index.uses(var)))
            })
            .count();
    }
    unused >= 1
}

/// Products of the extents of the spatial and of the reduction loops.
pub(crate) fn cumulative_lengths(sch: &Schedule, block: BlockRV) -> ScheduleResult<(i64, i64)> {
    let mut space = 1i64;
    let mut reduce = 1i64;
    for loop_rv in sch.get_loops(block)? {
        let extent = sch.for_loop(loop_rv)?.extent;
        match sch.loop_iter_type(block, loop_rv)? {
            Some(IterKind::Spatial) => space = space.saturating_mul(extent),
            Some(IterKind::Reduce) => reduce = reduce.saturating_mul(extent),
            None => {}
        }
    }
    Ok((space, reduce))
}

/// Whether splitting the reduction of a block across parallel workers is
/// worthwhile. `max_parallel_extent` bounds the parallelism the spatial loops
/// may already provide for tiled blocks; `max_parallel_basic` is the
/// reduction length above which untiled blocks are split.
pub(crate) fn needs_rfactor_or_cross_thread_reduction(
    sch: &Schedule,
    block: BlockRV,
    max_parallel_extent: i64,
    max_parallel_basic: i64,
) -> bool {
    let Ok(node) = sch.block(block) else {
        return false;
    };
    if !node.is_leaf() || !node.is_reduction() || is_tiled(sch, block) {
        return false;
    }
    if !sch.is_trivial_binding(block).unwrap_or(false) {
        return false;
    }
    let Ok(loops) = sch.get_loops(block) else {
        return false;
    };
    let mut has_reduction = false;
    for loop_rv in &loops {
        match sch.loop_iter_type(block, *loop_rv) {
            Ok(Some(IterKind::Reduce)) => has_reduction = true,
            Ok(Some(IterKind::Spatial)) => {}
            _ => return false,
        }
        // The nest must be perfect down to the block.
        match sch.for_loop(*loop_rv) {
            Ok(lp) if lp.body.len() == 1 => {}
            _ => return false,
        }
    }
    if !has_reduction {
        return false;
    }
    let Ok((space, reduce)) = cumulative_lengths(sch, block) else {
        return false;
    };
    if needs_multi_level_tiling(sch, block) {
        space < reduce && space <= max_parallel_extent
    } else if reduce > 1 {
        reduce > max_parallel_basic
    } else {
        false
    }
}

/// Moves the reduction loops of a block innermost and fuses them. Returns the
/// fused loop and the number of spatial loops left outside it.
pub(crate) fn reorder_and_fuse_reduction_loops(
    sch: &mut Schedule,
    block: BlockRV,
) -> ScheduleResult<(LoopRV, usize)> {
    let loops = sch.get_loops(block)?;
    let mut spatial = Vec::new();
    let mut reduction = Vec::new();
    for loop_rv in &loops {
        match sch.loop_iter_type(block, *loop_rv)? {
            Some(IterKind::Reduce) => reduction.push(*loop_rv),
            _ => spatial.push(*loop_rv),
        }
    }
    let num_spatial = spatial.len();
    let mut order = spatial;
    order.extend_from_slice(&reduction);
    if order != loops {
        sch.reorder(&order)?;
    }
    let fused = match reduction.as_slice() {
        [] => return Err(ScheduleError::malformed("block has no reduction loop")),
        [single] => *single,
        _ => sch.fuse(&reduction)?,
    };
    Ok((fused, num_spatial))
}

/// Factor candidates no larger than `max_extent`; `[max_extent]` when none is.
pub(crate) fn bounded_candidates(candidates: &[i64], max_extent: i64) -> Vec<i64> {
    let kept: Vec<i64> = candidates
        .iter()
        .copied()
        .filter(|extent| *extent <= max_extent)
        .collect();
    if kept.is_empty() {
        vec![max_extent]
    } else {
        kept
    }
}

/// Uniform categorical sample over `candidates`.
pub(crate) fn sample_uniform(sch: &mut Schedule, candidates: &[i64]) -> ScheduleResult<i64> {
    if let [only] = candidates {
        return Ok(*only);
    }
    let probs = vec![1.0 / candidates.len() as f64; candidates.len()];
    sch.sample_categorical(candidates, &probs)
}

#[cfg(test)]
mod tests {
    use super::bounded_candidates;

    #[test]
    fn bounded_candidates_fall_back_to_bound() {
        assert_eq!(bounded_candidates(&[32, 64, 128], 64), vec![32, 64]);
        assert_eq!(bounded_candidates(&[32, 64], 16), vec![16]);
    }
}
