//! Design-space generation by applying a rule list to every block.

use std::sync::Arc;

use tessera_tir::{BlockRV, Schedule};

use crate::attr;
use crate::context::TuneContext;
use crate::env;
use crate::error::RuleResult;
use crate::rule::{is_apply_custom_rule, ScheduleRule};

/// Restricts the blocks the rules are applied to.
pub type BlockFilter = Arc<dyn Fn(&Schedule, BlockRV) -> bool + Send + Sync>;

/// Applies rules rule by rule, each to every block of the function from the
/// last block to the first, fanning out over the variants each application
/// returns.
///
/// The block list is taken once from the input schedule, root included.
/// Blocks a rule removes are skipped by later rules; blocks a rule creates
/// are not visited. Blocks annotated with `schedule_rule` are only offered
/// to the custom-rule dispatch.
#[derive(Clone)]
pub struct PostOrderApply {
    rules: Vec<Box<dyn ScheduleRule>>,
    block_filter: Option<BlockFilter>,
}

impl PostOrderApply {
    pub fn new(rules: Vec<Box<dyn ScheduleRule>>) -> Self {
        Self {
            rules,
            block_filter: None,
        }
    }

    pub fn with_block_filter(mut self, filter: BlockFilter) -> Self {
        self.block_filter = Some(filter);
        self
    }

    pub fn rules(&self) -> &[Box<dyn ScheduleRule>] {
        &self.rules
    }

    pub fn initialize_with_tune_context(&mut self, context: &TuneContext) -> RuleResult<()> {
        for rule in &mut self.rules {
            rule.initialize_with_tune_context(context)?;
        }
        Ok(())
    }

    pub fn generate_design_space(&mut self, sch: Schedule) -> Vec<Schedule> {
        let keep = |block: &BlockRV| match &self.block_filter {
            Some(filter) => filter(&sch, *block),
            None => true,
        };
        let blocks: Vec<BlockRV> = sch.blocks().into_iter().filter(keep).collect();
        let verify = env::verify_enabled();
        let trace = env::trace_rules_enabled();

        let mut space = vec![sch];
        for rule in &mut self.rules {
            let sentinel = is_apply_custom_rule(&**rule);
            let mut stack: Vec<(Schedule, Vec<BlockRV>)> =
                space.drain(..).map(|sch| (sch, blocks.clone())).collect();
            let mut applied = 0usize;
            while let Some((mut sch, mut pending)) = stack.pop() {
                let Some(block) = pending.pop() else {
                    space.push(sch);
                    continue;
                };
                if !sch.has_block(block) {
                    stack.push((sch, pending));
                    continue;
                }
                if !sentinel && sch.block_annotation(block, attr::SCHEDULE_RULE).is_some() {
                    stack.push((sch, pending));
                    continue;
                }
                let variants = rule.apply(&mut sch, block);
                if trace {
                    log::info!("{rule} on {block}: {} variants", variants.len());
                }
                if variants.is_empty() {
                    stack.push((sch, pending));
                    continue;
                }
                applied += 1;
                for variant in variants {
                    if verify {
                        if let Err(err) = variant.verify() {
                            panic!("{rule} produced an invalid schedule for {block}: {err}");
                        }
                    }
                    stack.push((variant, pending.clone()));
                }
            }
            let count = space.len();
            log::debug!("{rule}: applied to {applied} blocks, {count} schedules");
        }
        space
    }
}
