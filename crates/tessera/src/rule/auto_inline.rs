use std::any::Any;
use std::fmt;

use tessera_tir::{BlockRV, Schedule};

use crate::attr;
use crate::context::TuneContext;
use crate::error::RuleResult;

use super::{mark_initialized, try_variant, ScheduleRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InlineType {
    NoInline,
    IntoConsumer,
    IntoProducer,
}

/// Inlines spatial blocks into their consumers or into their single producer.
#[derive(Debug, Clone)]
pub struct AutoInline {
    into_producer: bool,
    into_consumer: bool,
    inline_const_tensor: bool,
    disallow_if_then_else: bool,
    require_injective: bool,
    require_ordered: bool,
    disallow_op: Vec<String>,
    initialized: bool,
}

impl AutoInline {
    pub fn new(
        into_producer: bool,
        into_consumer: bool,
        inline_const_tensor: bool,
        disallow_if_then_else: bool,
        require_injective: bool,
        require_ordered: bool,
        disallow_op: &[&str],
    ) -> Self {
        Self {
            into_producer,
            into_consumer,
            inline_const_tensor,
            disallow_if_then_else,
            require_injective,
            require_ordered,
            disallow_op: disallow_op.iter().map(|op| op.to_string()).collect(),
            initialized: false,
        }
    }

    /// Flags used by the CPU pipelines.
    pub fn cpu() -> Self {
        Self::new(false, true, true, true, true, true, &["tir.exp"])
    }

    /// Flags used by the GPU pipelines.
    pub fn gpu() -> Self {
        Self::new(true, true, true, false, false, false, &[])
    }

    fn check_inline(&self, sch: &Schedule, block: BlockRV) -> InlineType {
        let Ok(node) = sch.block(block) else {
            return InlineType::NoInline;
        };
        if block == sch.root_block() || !node.is_leaf() || !node.is_spatial() {
            return InlineType::NoInline;
        }
        let Some(store) = &node.store else {
            return InlineType::NoInline;
        };
        if store.target.plain_iters().is_none() {
            return InlineType::NoInline;
        }
        let is_output = sch.is_output_block(block).unwrap_or(true);
        if self.inline_const_tensor && node.read_buffers().is_empty() && !is_output {
            return InlineType::IntoConsumer;
        }
        // Purely spatial functions inline everything they legally can.
        let pure_spatial = sch.is_spatial_func();
        if !pure_spatial {
            if self
                .disallow_op
                .iter()
                .any(|op| store.value.calls_op(op))
            {
                log::trace!("AutoInline: {block} calls a disallowed op");
                return InlineType::NoInline;
            }
            if self.disallow_if_then_else && store.value.has_select() {
                return InlineType::NoInline;
            }
            if self.require_injective && !sch.access_is_injective(block).unwrap_or(false) {
                return InlineType::NoInline;
            }
            if self.require_ordered && !sch.access_is_ordered(block).unwrap_or(false) {
                return InlineType::NoInline;
            }
        }
        if node.annotation(attr::INLINE_RULE).and_then(|v| v.as_int()) == Some(0) {
            return InlineType::NoInline;
        }
        if self.into_consumer
            && !is_output
            && sch.clone().compute_inline(block).is_ok()
        {
            return InlineType::IntoConsumer;
        }
        if self.into_producer {
            let producers = sch.get_producers(block).unwrap_or_default();
            if let [producer] = producers.as_slice() {
                let spatial = sch.block(*producer).is_ok_and(|p| p.is_spatial());
                let tensorized = sch
                    .block_annotation(*producer, attr::AUTO_TENSORIZE)
                    .is_some();
                if spatial && !tensorized && sch.clone().reverse_compute_inline(block).is_ok() {
                    return InlineType::IntoProducer;
                }
            }
        }
        InlineType::NoInline
    }
}

impl fmt::Display for AutoInline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AutoInline(into_producer={}, into_consumer={}, inline_const_tensor={}, \
             disallow_if_then_else={}, require_injective={}, require_ordered={}, disallow_op={:?})",
            self.into_producer,
            self.into_consumer,
            self.inline_const_tensor,
            self.disallow_if_then_else,
            self.require_injective,
            self.require_ordered,
            self.disallow_op
        )
    }
}

impl ScheduleRule for AutoInline {
    fn initialize_with_tune_context(&mut self, _context: &TuneContext) -> RuleResult<()> {
        mark_initialized(&mut self.initialized, "AutoInline")
    }

    fn apply(&mut self, sch: &mut Schedule, block: BlockRV) -> Vec<Schedule> {
        let variant = match self.check_inline(sch, block) {
            InlineType::NoInline => None,
            InlineType::IntoConsumer => {
                try_variant(sch, "AutoInline", |sch| sch.compute_inline(block))
            }
            InlineType::IntoProducer => {
                try_variant(sch, "AutoInline", |sch| sch.reverse_compute_inline(block))
            }
        };
        variant.into_iter().collect()
    }

    fn clone_rule(&self) -> Box<dyn ScheduleRule> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
