use std::env;
use std::sync::OnceLock;

static TESSERA_VERIFY: OnceLock<bool> = OnceLock::new();
static TESSERA_TRACE_RULES: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn flag(cell: &OnceLock<bool>, name: &str, default: bool) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    })
}

/// Whether the design-space driver checks every schedule it produces.
pub(crate) fn verify_enabled() -> bool {
    flag(&TESSERA_VERIFY, "TESSERA_VERIFY", cfg!(debug_assertions))
}

/// Whether every rule application is logged at `info`.
pub(crate) fn trace_rules_enabled() -> bool {
    flag(&TESSERA_TRACE_RULES, "TESSERA_TRACE_RULES", false)
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parses_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
