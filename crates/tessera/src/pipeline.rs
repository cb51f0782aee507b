use crate::error::RuleResult;
use crate::rule::{ApplyCustomRule, InlineConstantScalars, ScheduleRule};

pub struct RulePipelineBuilder {
    rules: Vec<Box<dyn ScheduleRule>>,
}

impl RulePipelineBuilder {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rule(&mut self, rule: impl ScheduleRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn finish(self) -> Vec<Box<dyn ScheduleRule>> {
        self.rules
    }
}

impl Default for RulePipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Target-specific contributions to a rule pipeline.
///
/// Hooks run in declaration order, so the stages of the assembled pipeline
/// are always: custom dispatch, inlining, reductions, tiling, lowering
/// hints. Rules only see blocks in the state earlier stages left them in.
pub trait TargetRules: Send + Sync {
    fn populate_custom(&self, _p: &mut RulePipelineBuilder) -> RuleResult<()> {
        Ok(())
    }
    fn populate_inline(&self, _p: &mut RulePipelineBuilder) -> RuleResult<()> {
        Ok(())
    }
    fn populate_reduction(&self, _p: &mut RulePipelineBuilder) -> RuleResult<()> {
        Ok(())
    }
    fn populate_tiling(&self, _p: &mut RulePipelineBuilder) -> RuleResult<()> {
        Ok(())
    }
    fn populate_lowering(&self, _p: &mut RulePipelineBuilder) -> RuleResult<()> {
        Ok(())
    }
}

/// Builds a fresh rule list for `target`. Custom-rule dispatch always comes
/// first and constant scalars are always inlined before any target rule runs.
pub fn assemble(target: &dyn TargetRules) -> RuleResult<Vec<Box<dyn ScheduleRule>>> {
    let mut builder = RulePipelineBuilder::new();

    builder.rule(ApplyCustomRule::new());
    target.populate_custom(&mut builder)?;

    builder.rule(InlineConstantScalars::new());
    target.populate_inline(&mut builder)?;

    target.populate_reduction(&mut builder)?;
    target.populate_tiling(&mut builder)?;
    target.populate_lowering(&mut builder)?;

    let rules = builder.finish();
    log::debug!("assembled {} schedule rules", rules.len());
    Ok(rules)
}
