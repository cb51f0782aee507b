mod support;

use anyhow::Result;
use tessera::attr;
use tessera::rule::{AutoInline, InlineConstantScalars, ScheduleRule};
use tessera::tessera_tir::{iv, BlockRV, DType, Expr, FuncBuilder, PrimFunc, ReduceKind, Schedule};
use tessera::{PostOrderApply, RuleError};

use support::{elementwise_chain, leaf_blocks, llvm_context, scalar_constant_chain};

fn producer_only() -> AutoInline {
    AutoInline::new(true, false, false, false, false, false, &[])
}

/// B[i, k] = exp(A[i, k]), S[i] += B[i, k].
fn exp_then_sum() -> Result<(PrimFunc, BlockRV, BlockRV)> {
    let mut fb = FuncBuilder::new("exp_sum");
    let a = fb.input("A", &[16, 256], DType::F32);
    let b = fb.alloc("B", &[16, 256], DType::F32);
    let s = fb.output("S", &[16], DType::F32);
    let exp = fb
        .block("B")
        .spatial(16)
        .spatial(256)
        .store(
            b,
            vec![iv(0), iv(1)],
            Expr::call("tir.exp", vec![Expr::load(a, vec![iv(0), iv(1)])]),
        )
        .finish()?;
    let sum = fb
        .block("S")
        .spatial(16)
        .reduce(256)
        .accumulate(
            s,
            vec![iv(0)],
            ReduceKind::Sum,
            Expr::load(b, vec![iv(0), iv(1)]),
        )
        .finish()?;
    Ok((fb.finish(), exp, sum))
}

#[test]
fn inlines_elementwise_chain_into_consumers() -> Result<()> {
    let chain = elementwise_chain(64, 64)?;
    let mut space = PostOrderApply::new(vec![Box::new(AutoInline::cpu())]);
    space.initialize_with_tune_context(&llvm_context())?;

    let schedules = space.generate_design_space(Schedule::new(chain.func, 0));
    assert_eq!(schedules.len(), 1);
    assert_eq!(leaf_blocks(&schedules[0]), vec![chain.last]);
    schedules[0].verify()?;
    Ok(())
}

#[test]
fn output_blocks_are_never_inlined_into_consumers() -> Result<()> {
    let chain = elementwise_chain(16, 16)?;
    let mut sch = Schedule::new(chain.func, 0);
    let root = sch.root_block();
    let mut rule = AutoInline::cpu();
    assert!(rule.apply(&mut sch, chain.last).is_empty());
    assert!(rule.apply(&mut sch, root).is_empty());
    assert_eq!(rule.apply(&mut sch, chain.second).len(), 1);
    Ok(())
}

#[test]
fn disabled_directions_leave_blocks_alone() -> Result<()> {
    let chain = elementwise_chain(16, 16)?;
    let mut rule = AutoInline::new(false, false, true, true, true, true, &[]);
    let mut sch = Schedule::new(chain.func, 0);
    for block in [chain.first, chain.second, chain.last] {
        assert!(rule.apply(&mut sch, block).is_empty(), "{block}");
    }
    Ok(())
}

#[test]
fn inlines_consumers_into_their_producer() -> Result<()> {
    let chain = elementwise_chain(32, 32)?;
    let mut space = PostOrderApply::new(vec![Box::new(producer_only())]);
    space.initialize_with_tune_context(&llvm_context())?;

    let schedules = space.generate_design_space(Schedule::new(chain.func, 0));
    assert_eq!(schedules.len(), 1);
    let sch = &schedules[0];
    assert_eq!(leaf_blocks(sch), vec![chain.first]);
    assert!(sch.is_output_block(chain.first)?);
    Ok(())
}

#[test]
fn inline_rule_annotation_blocks_inlining() -> Result<()> {
    let chain = elementwise_chain(16, 16)?;
    let mut sch = Schedule::new(chain.func, 0);
    sch.annotate_block(chain.second, attr::INLINE_RULE, 0i64)?;

    let mut rule = AutoInline::gpu();
    assert!(rule.apply(&mut sch, chain.second).is_empty());
    assert_eq!(rule.apply(&mut sch, chain.first).len(), 1);
    Ok(())
}

#[test]
fn disallowed_ops_stay_materialized_outside_spatial_functions() -> Result<()> {
    let (func, exp, sum) = exp_then_sum()?;
    let mut sch = Schedule::new(func, 0);

    assert!(AutoInline::cpu().apply(&mut sch, exp).is_empty());

    let variants = AutoInline::gpu().apply(&mut sch, exp);
    assert_eq!(variants.len(), 1);
    assert_eq!(leaf_blocks(&variants[0]), vec![sum]);
    assert_eq!(
        leaf_blocks(&sch).len(), 2,
        "input schedule must be untouched"
    );
    Ok(())
}

#[test]
fn constant_scalars_are_inlined() -> Result<()> {
    let fixture = scalar_constant_chain()?;
    let mut sch = Schedule::new(fixture.func, 0);
    let mut rule = InlineConstantScalars::new();

    assert!(rule.apply(&mut sch, fixture.producer).is_empty());
    assert!(rule.apply(&mut sch, fixture.consumer).is_empty());

    let variants = rule.apply(&mut sch, fixture.scalar);
    assert_eq!(variants.len(), 1);
    let inlined = &variants[0];
    assert!(!inlined.has_block(fixture.scalar));
    assert_eq!(
        inlined.get_producers(fixture.consumer)?,
        vec![fixture.producer]
    );
    inlined.verify()?;
    Ok(())
}

#[test]
fn scalar_inlining_unlocks_producer_inlining() -> Result<()> {
    let fixture = scalar_constant_chain()?;
    let context = llvm_context();

    let mut alone = PostOrderApply::new(vec![Box::new(producer_only())]);
    alone.initialize_with_tune_context(&context)?;
    let schedules = alone.generate_design_space(Schedule::new(fixture.func.clone(), 0));
    assert_eq!(schedules.len(), 1);
    assert_eq!(leaf_blocks(&schedules[0]).len(), 3);

    let rules: Vec<Box<dyn ScheduleRule>> = vec![
        Box::new(InlineConstantScalars::new()),
        Box::new(producer_only()),
    ];
    let mut ordered = PostOrderApply::new(rules);
    ordered.initialize_with_tune_context(&context)?;
    let schedules = ordered.generate_design_space(Schedule::new(fixture.func, 0));
    assert_eq!(schedules.len(), 1);
    assert_eq!(leaf_blocks(&schedules[0]), vec![fixture.producer]);
    Ok(())
}

#[test]
fn inline_rules_initialize_once() -> Result<()> {
    let context = llvm_context();
    let mut auto = AutoInline::cpu();
    auto.initialize_with_tune_context(&context)?;
    assert_eq!(
        auto.initialize_with_tune_context(&context),
        Err(RuleError::AlreadyInitialized("AutoInline".to_string()))
    );

    let mut scalars = InlineConstantScalars::new();
    scalars.initialize_with_tune_context(&context)?;
    assert_eq!(
        scalars.initialize_with_tune_context(&context),
        Err(RuleError::AlreadyInitialized("InlineConstantScalars".to_string()))
    );
    let mut clone = scalars.clone_rule();
    assert!(clone.initialize_with_tune_context(&context).is_err());
    Ok(())
}
