mod support;

use anyhow::Result;
use tessera::attr;
use tessera::rule::{
    AddRFactor, AutoBind, ParallelizeVectorizeUnroll, RandomComputeLocation, ScheduleRule,
};
use tessera::tessera_tir::{AnnValue, BlockRV, Schedule};
use tessera::{RuleError, TuneContext};

use support::{
    cuda_context, elementwise_chain, initialized, leaf_blocks, llvm_context, matmul, render,
    row_sum,
};

fn tags(sch: &Schedule, block: BlockRV) -> Result<Vec<(Option<String>, i64)>> {
    let mut out = Vec::new();
    for loop_rv in sch.get_loops(block)? {
        let lp = sch.for_loop(loop_rv)?;
        out.push((lp.kind.thread_tag().map(str::to_string), lp.extent));
    }
    Ok(out)
}

#[test]
fn root_gets_parallel_vectorize_and_unroll_limits() -> Result<()> {
    let (func, block) = matmul(64, 64, 64)?;
    let mut rule = initialized(ParallelizeVectorizeUnroll::default(), &llvm_context())?;
    let mut sch = Schedule::new(func, 0);
    let root = sch.root_block();

    assert!(rule.apply(&mut sch, block).is_empty());
    let variants = rule.apply(&mut sch, root);
    assert_eq!(variants.len(), 1);
    let root_ann = |key: &str| variants[0].block_annotation(root, key).cloned();
    assert_eq!(root_ann(attr::PARALLEL), Some(AnnValue::from(64i64)));
    assert_eq!(root_ann(attr::VECTORIZE), Some(AnnValue::from(16i64)));
    let steps = root_ann(attr::UNROLL_EXPLICIT)
        .and_then(|value| value.as_int())
        .expect("unroll steps sampled");
    assert!([0, 16, 64, 512].contains(&steps));
    assert!(root_ann(attr::UNROLL_IMPLICIT).is_none());
    Ok(())
}

#[test]
fn spatial_functions_are_not_unrolled() -> Result<()> {
    let chain = elementwise_chain(32, 32)?;
    let rule = ParallelizeVectorizeUnroll::new(-1, 8, &[0, 16], false);
    let mut rule = initialized(rule, &TuneContext::new())?;
    let mut sch = Schedule::new(chain.func, 0);
    let root = sch.root_block();

    let variants = rule.apply(&mut sch, root);
    assert_eq!(variants.len(), 1);
    let root_ann = |key: &str| variants[0].block_annotation(root, key).cloned();
    assert!(root_ann(attr::PARALLEL).is_none());
    assert_eq!(root_ann(attr::VECTORIZE), Some(AnnValue::from(8i64)));
    assert!(root_ann(attr::UNROLL_IMPLICIT).is_none());

    let idle = ParallelizeVectorizeUnroll::new(-1, -1, &[], true);
    let mut idle = initialized(idle, &TuneContext::new())?;
    assert!(idle.apply(&mut sch, root).is_empty());
    Ok(())
}

#[test]
fn parallel_limit_needs_a_target() {
    let mut rule = ParallelizeVectorizeUnroll::default();
    assert_eq!(
        rule.initialize_with_tune_context(&TuneContext::new()),
        Err(RuleError::MissingTarget("ParallelizeVectorizeUnroll".to_string()))
    );
}

#[test]
fn auto_bind_splits_fused_spatial_loops() -> Result<()> {
    let chain = elementwise_chain(64, 64)?;
    let mut rule = initialized(AutoBind::default(), &cuda_context())?;
    let mut sch = Schedule::new(chain.func, 4);
    let root = sch.root_block();

    assert!(rule.apply(&mut sch, root).is_empty());
    let variants = rule.apply(&mut sch, chain.last);
    assert_eq!(variants.len(), 1);
    let loops = tags(&variants[0], chain.last)?;
    assert_eq!(loops.len(), 2);
    assert_eq!(loops[0].0.as_deref(), Some("blockIdx.x"));
    assert_eq!(loops[1].0.as_deref(), Some("threadIdx.x"));
    assert_eq!(loops[0].1 * loops[1].1, 64 * 64);
    assert!([32, 64, 128, 256, 512, 1024].contains(&loops[1].1));

    let mut bound = variants.into_iter().next().expect("one variant");
    assert!(
        rule.apply(&mut bound, chain.last).is_empty(),
        "already bound"
    );
    Ok(())
}

#[test]
fn auto_bind_keeps_a_serial_loop_for_huge_extents() -> Result<()> {
    let chain = elementwise_chain(1024, 1024)?;
    let mut rule = initialized(AutoBind::new(256, &[32, 64], 1024)?, &TuneContext::new())?;
    let mut sch = Schedule::new(chain.func, 0);

    let variants = rule.apply(&mut sch, chain.last);
    assert_eq!(variants.len(), 1);
    assert_eq!(
        tags(&variants[0], chain.last)?,
        vec![
            (Some("blockIdx.x".to_string()), 256),
            (Some("threadIdx.x".to_string()), 1024),
            (None, 4),
        ]
    );
    Ok(())
}

#[test]
fn auto_bind_validates_configuration() {
    assert_eq!(
        AutoBind::new(256, &[32, -1], 1024).err(),
        Some(RuleError::InvalidThreadExtent(-1))
    );
    assert!(matches!(
        AutoBind::new(0, &[32], 1024),
        Err(RuleError::InvalidConfig(_))
    ));
    let mut rule = AutoBind::default();
    assert!(rule.initialize_with_tune_context(&llvm_context()).is_err());
}

#[test]
fn compute_location_only_moves_free_blocks() -> Result<()> {
    let chain = elementwise_chain(16, 16)?;
    let mut rule = initialized(RandomComputeLocation::new(), &llvm_context())?;
    let mut sch = Schedule::new(chain.func, 0);
    let root = sch.root_block();

    assert!(rule.apply(&mut sch, root).is_empty());
    assert!(
        rule.apply(&mut sch, chain.last).is_empty(),
        "nothing consumes the output"
    );
    assert_eq!(rule.apply(&mut sch, chain.first).len(), 1);
    Ok(())
}

#[test]
fn compute_location_is_reproducible_per_seed() -> Result<()> {
    let chain = elementwise_chain(16, 16)?;
    let sch = Schedule::new(chain.func, 0);
    let context = llvm_context();

    let draw = |rule: &mut dyn ScheduleRule| -> Vec<String> {
        (0..24)
            .flat_map(|_| rule.apply(&mut sch.clone(), chain.first))
            .flat_map(|variant| render(&[variant]))
            .collect()
    };
    let mut first = initialized(RandomComputeLocation::new(), &context)?;
    let mut second = initialized(RandomComputeLocation::new(), &context)?;
    assert_eq!(draw(&mut first), draw(&mut second));
    Ok(())
}

#[test]
fn cloned_compute_location_draws_its_own_stream() -> Result<()> {
    let chain = elementwise_chain(16, 16)?;
    let sch = Schedule::new(chain.func, 0);

    let mut rule = initialized(RandomComputeLocation::new(), &llvm_context())?;
    let mut clone = rule.clone_rule();
    let draws = |rule: &mut dyn ScheduleRule| -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..24 {
            out.extend(render(&rule.apply(&mut sch.clone(), chain.first)));
        }
        out
    };
    let original = draws(&mut rule);
    let cloned = draws(clone.as_mut());
    assert_eq!(original.len(), 24);
    assert_eq!(cloned.len(), 24);
    assert_ne!(original, cloned);
    Ok(())
}

#[test]
fn compute_location_brings_factored_producer_along() -> Result<()> {
    let (func, block) = row_sum(4, 4096)?;
    let context = llvm_context();
    let mut rfactor = initialized(AddRFactor::new(16, None), &context)?;
    let mut placement = initialized(RandomComputeLocation::new(), &context)?;
    let mut sch = Schedule::new(func, 2);

    let mut factored = rfactor.apply(&mut sch, block);
    let variant = factored.first_mut().expect("rfactor applies");
    let marker = attr::RANDOM_COMPUTE_PRODUCER;
    assert!(variant.block_annotation(block, marker).is_some());

    let placed = placement.apply(variant, block);
    assert_eq!(placed.len(), 1);
    assert!(placed[0].block_annotation(block, marker).is_none());
    assert_eq!(leaf_blocks(&placed[0]).len(), 2);
    placed[0].verify()?;
    Ok(())
}
