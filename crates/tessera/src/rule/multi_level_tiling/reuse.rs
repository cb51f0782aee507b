use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RuleError, RuleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReuseType {
    /// No cache stage.
    #[default]
    No,
    /// Variants with and without a cache stage.
    May,
    /// Always add a cache stage.
    Must,
}

impl fmt::Display for ReuseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReuseType::No => "no",
            ReuseType::May => "may",
            ReuseType::Must => "must",
        })
    }
}

/// Where and how a tiled block stages its reads or writes through a cache.
///
/// `levels` are 1-based tile levels: level `n` attaches the cache under the
/// innermost loop of the `n`-th letter of the tiling structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReuseConfig {
    pub req: ReuseType,
    #[serde(default)]
    pub levels: Vec<usize>,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    "global".to_string()
}

impl Default for ReuseConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl ReuseConfig {
    pub fn new(req: ReuseType, levels: &[usize], scope: &str) -> RuleResult<Self> {
        let config = Self {
            req,
            levels: levels.to_vec(),
            scope: scope.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn none() -> Self {
        Self {
            req: ReuseType::No,
            levels: Vec::new(),
            scope: default_scope(),
        }
    }

    pub fn may(levels: &[usize], scope: &str) -> RuleResult<Self> {
        Self::new(ReuseType::May, levels, scope)
    }

    pub fn must(levels: &[usize], scope: &str) -> RuleResult<Self> {
        Self::new(ReuseType::Must, levels, scope)
    }

    /// Parses the map form `{"req": "may", "levels": [1, 2], "scope": "global"}`.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: ReuseConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RuleResult<()> {
        if self.req == ReuseType::No {
            return Ok(());
        }
        if self.levels.is_empty() {
            return Err(RuleError::InvalidReuse(format!(
                "`{}` reuse needs at least one level",
                self.req
            )));
        }
        if self.levels.contains(&0) {
            return Err(RuleError::InvalidReuse("levels are 1-based".to_string()));
        }
        if self.scope.is_empty() {
            return Err(RuleError::InvalidReuse("empty storage scope".to_string()));
        }
        Ok(())
    }

    /// Checks the levels against a tiling structure of `n_levels` letters.
    pub(crate) fn check_levels(&self, n_levels: usize) -> RuleResult<()> {
        match self.levels.iter().find(|level| **level > n_levels) {
            Some(level) if self.req != ReuseType::No => Err(RuleError::InvalidReuse(format!(
                "level {level} exceeds the {n_levels} tile levels"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ReuseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}@{}", self.req, self.levels, self.scope)
    }
}
