use serde::{Deserialize, Serialize};

use crate::error::{RuleError, RuleResult};

/// Hardware facts consumed by schedule rules.
///
/// Only the attributes rules actually read are modelled. Parsing target
/// strings is left to the tuning tooling; a target is either built with one
/// of the constructors below or deserialized from a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub kind: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub num_cores: Option<i64>,
    #[serde(default)]
    pub max_threads_per_block: Option<i64>,
    #[serde(default)]
    pub thread_warp_size: Option<i64>,
    #[serde(default)]
    pub max_shared_memory_per_block: Option<i64>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub mattr: Vec<String>,
}

impl Target {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            keys: vec![kind.clone()],
            kind,
            num_cores: None,
            max_threads_per_block: None,
            thread_warp_size: None,
            max_shared_memory_per_block: None,
            arch: None,
            mattr: Vec::new(),
        }
    }

    pub fn llvm(num_cores: i64) -> Self {
        Self {
            keys: vec!["cpu".to_string()],
            num_cores: Some(num_cores),
            ..Self::new("llvm")
        }
    }

    pub fn cuda(max_threads_per_block: i64, thread_warp_size: i64) -> Self {
        Self {
            keys: vec!["cuda".to_string(), "gpu".to_string()],
            max_threads_per_block: Some(max_threads_per_block),
            thread_warp_size: Some(thread_warp_size),
            max_shared_memory_per_block: Some(49152),
            arch: Some("sm_80".to_string()),
            ..Self::new("cuda")
        }
    }

    pub fn hexagon(num_cores: i64) -> Self {
        Self {
            keys: vec!["hexagon".to_string(), "cpu".to_string()],
            num_cores: Some(num_cores),
            arch: Some("v68".to_string()),
            ..Self::new("hexagon")
        }
    }

    /// A bare-metal C target with a single core.
    pub fn micro() -> Self {
        Self {
            keys: vec!["cpu".to_string()],
            num_cores: Some(1),
            ..Self::new("c")
        }
    }

    pub fn arm(num_cores: i64, mattr: &[&str]) -> Self {
        Self {
            keys: vec!["arm_cpu".to_string(), "cpu".to_string()],
            num_cores: Some(num_cores),
            mattr: mattr.iter().map(|attr| attr.to_string()).collect(),
            ..Self::new("llvm")
        }
    }

    pub fn with_keys(mut self, keys: &[&str]) -> Self {
        self.keys = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let mut target: Target = serde_json::from_str(text)?;
        if target.keys.is_empty() {
            target.keys.push(target.kind.clone());
        }
        Ok(target)
    }

    /// Number of cores, falling back to the parallelism of the host.
    pub fn num_cores(&self) -> i64 {
        if let Some(cores) = self.num_cores {
            return cores;
        }
        let host = std::thread::available_parallelism()
            .map(|n| n.get() as i64)
            .unwrap_or(1);
        log::warn!(
            "target `{}` does not define num_cores, using host parallelism {}",
            self.kind,
            host
        );
        host
    }

    pub fn require_max_threads_per_block(&self) -> RuleResult<i64> {
        self.max_threads_per_block
            .ok_or_else(|| RuleError::missing_attr(&self.kind, "max_threads_per_block"))
    }

    pub fn require_thread_warp_size(&self) -> RuleResult<i64> {
        self.thread_warp_size
            .ok_or_else(|| RuleError::missing_attr(&self.kind, "thread_warp_size"))
    }
}
