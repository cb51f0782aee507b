mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tessera::attr;
use tessera::rule::{
    custom_rules, register_custom_rule, ApplyCustomRule, CustomRuleRegistry, ExternalRule,
    InlineConstantScalars, MultiLevelTiling, ScheduleRule,
};
use tessera::tessera_tir::{BlockRV, Schedule};
use tessera::{is_apply_custom_rule, PostOrderApply, RuleError, RuleResult, Target, TuneContext};

use support::{leaf_blocks, matmul};

fn accel_context() -> TuneContext {
    TuneContext::new().with_target(Target::new("accel").with_keys(&["accel", "cpu"]))
}

fn two_forks(sch: &mut Schedule, _block: BlockRV) -> Vec<Schedule> {
    vec![sch.fork(), sch.fork()]
}

#[test]
fn dispatches_on_the_first_matching_target_key() -> Result<()> {
    let registry = Arc::new(CustomRuleRegistry::new());
    registry.register("cpu", "pair", two_forks);
    registry.register("gpu", "pair", |_: &mut Schedule, _: BlockRV| Vec::new());

    let mut rule = ApplyCustomRule::with_registry(Arc::clone(&registry));
    rule.initialize_with_tune_context(&accel_context())?;

    let (func, block) = matmul(32, 32, 32)?;
    let mut sch = Schedule::new(func, 0);
    assert!(
        rule.apply(&mut sch, block).is_empty(),
        "unannotated blocks are ignored"
    );

    sch.annotate_block(block, attr::SCHEDULE_RULE, "pair")?;
    assert_eq!(rule.apply(&mut sch, block).len(), 2);
    assert_eq!(
        registry.list(),
        vec![
            ("cpu".to_string(), "pair".to_string()),
            ("gpu".to_string(), "pair".to_string()),
        ]
    );
    Ok(())
}

#[test]
fn missing_rule_falls_back_to_default_rules() -> Result<()> {
    let mut rule = ApplyCustomRule::with_registry(Arc::new(CustomRuleRegistry::new()));
    rule.initialize_with_tune_context(&accel_context())?;

    let (func, block) = matmul(32, 32, 32)?;
    let mut sch = Schedule::new(func, 0);
    sch.annotate_block(block, attr::SCHEDULE_RULE, "unregistered")?;

    assert!(rule.apply(&mut sch, block).is_empty());
    assert!(sch.block_annotation(block, attr::SCHEDULE_RULE).is_none());
    Ok(())
}

#[test]
fn none_keeps_the_block_unscheduled() -> Result<()> {
    let (func, block) = matmul(64, 64, 64)?;
    let mut sch = Schedule::new(func, 0);
    sch.annotate_block(block, attr::SCHEDULE_RULE, "None")?;

    let rules: Vec<Box<dyn ScheduleRule>> = vec![
        Box::new(ApplyCustomRule::with_registry(Arc::new(CustomRuleRegistry::new()))),
        Box::new(MultiLevelTiling::new("SSRSRS", None, None, None, None, None)?),
    ];
    let mut space = PostOrderApply::new(rules);
    space.initialize_with_tune_context(&accel_context())?;

    let schedules = space.generate_design_space(sch);
    assert_eq!(schedules.len(), 1);
    let tiled = schedules[0].block_annotation(block, attr::TILING_STRUCTURE);
    assert!(tiled.is_none());
    assert_eq!(schedules[0].get_loops(block)?.len(), 3);
    Ok(())
}

#[test]
fn global_registry_serves_new_dispatchers() -> Result<()> {
    register_custom_rule("accel", "tessera_test_global", two_forks);
    assert!(custom_rules()
        .list()
        .contains(&("accel".to_string(), "tessera_test_global".to_string())));

    let mut rule = ApplyCustomRule::new();
    rule.initialize_with_tune_context(&accel_context())?;
    let (func, block) = matmul(16, 16, 16)?;
    let mut sch = Schedule::new(func, 0);
    sch.annotate_block(block, attr::SCHEDULE_RULE, "tessera_test_global")?;
    assert_eq!(rule.apply(&mut sch, block).len(), 2);
    Ok(())
}

#[test]
fn dispatcher_needs_target_keys() {
    let mut rule = ApplyCustomRule::new();
    assert_eq!(
        rule.initialize_with_tune_context(&TuneContext::new()),
        Err(RuleError::MissingTarget("ApplyCustomRule".to_string()))
    );
    assert!(is_apply_custom_rule(&rule));
    assert!(!is_apply_custom_rule(&InlineConstantScalars::new()));
}

#[test]
fn external_rule_forwards_every_call() -> Result<()> {
    let initialized = Arc::new(AtomicUsize::new(0));
    let applied = Arc::new(AtomicUsize::new(0));
    let init_count = Arc::clone(&initialized);
    let apply_count = Arc::clone(&applied);

    let mut rule = ExternalRule::new(
        Box::new(move |context: &TuneContext| -> RuleResult<()> {
            assert!(context.target.is_some());
            init_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        Box::new(move |sch: &mut Schedule, _block: BlockRV| -> Vec<Schedule> {
            apply_count.fetch_add(1, Ordering::SeqCst);
            vec![sch.fork()]
        }),
        Box::new(|| Box::new(InlineConstantScalars::new()) as Box<dyn ScheduleRule>),
        Box::new(|| "PyRuleStub".to_string()),
    );
    rule.initialize_with_tune_context(&accel_context())?;

    let (func, block) = matmul(16, 16, 16)?;
    let mut sch = Schedule::new(func, 0);
    let variants = rule.apply(&mut sch, block);
    assert_eq!(variants.len(), 1);
    assert_eq!(leaf_blocks(&variants[0]), vec![block]);

    assert_eq!(initialized.load(Ordering::SeqCst), 1);
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(rule.to_string(), "PyRuleStub");
    assert_eq!(rule.clone_rule().to_string(), "InlineConstantScalars");
    Ok(())
}

#[test]
fn external_rule_propagates_initialization_errors() {
    let mut rule = ExternalRule::new(
        Box::new(|_: &TuneContext| -> RuleResult<()> {
            Err(RuleError::InvalidConfig("rejected".to_string()))
        }),
        Box::new(|_: &mut Schedule, _: BlockRV| -> Vec<Schedule> { Vec::new() }),
        Box::new(|| Box::new(InlineConstantScalars::new()) as Box<dyn ScheduleRule>),
        Box::new(|| "Rejecting".to_string()),
    );
    assert_eq!(
        rule.initialize_with_tune_context(&TuneContext::new()),
        Err(RuleError::InvalidConfig("rejected".to_string()))
    );
}
