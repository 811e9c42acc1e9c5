//! Expansion engine for `$name` and `${name}` variable references

use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Regex for matching variable references: $name or ${name}
static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\w+|\{([^}]*)\})").unwrap());

/// Ordered set of environment variables
pub type Environment = IndexMap<String, String>;

/// Options controlling how unresolved and escaped references are treated
#[derive(Debug, Clone, Copy)]
pub struct ExpandOptions<'a> {
    /// Replacement for unknown variables. `None` leaves the reference as-is.
    pub default: Option<&'a str>,
    /// Leave references preceded by a backslash untouched (backslash included)
    pub skip_escaped: bool,
}

impl Default for ExpandOptions<'_> {
    fn default() -> Self {
        Self {
            default: None,
            skip_escaped: true,
        }
    }
}

/// Expand variable references in `text`.
///
/// Names are looked up in `additional` first, then in the environment of the
/// current process. Unknown names are left unchanged.
pub fn expand(text: &str, additional: &Environment) -> String {
    expand_with(text, additional, ExpandOptions::default())
}

/// Expand variable references in `text` with explicit options
pub fn expand_with(text: &str, additional: &Environment, options: ExpandOptions<'_>) -> String {
    if text.is_empty() {
        return String::new();
    }

    VARIABLE_PATTERN
        .replace_all(text, |caps: &Captures| {
            let whole = &caps[0];
            let start = caps.get(0).map(|m| m.start()).unwrap_or_default();

            if options.skip_escaped && start > 0 && text.as_bytes()[start - 1] == b'\\' {
                return whole.to_string();
            }

            // ${name} captures the braced name in group 2, $name in group 1
            let name = caps
                .get(2)
                .or_else(|| caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or_default();

            if let Some(value) = additional.get(name) {
                return value.clone();
            }

            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => options.default.unwrap_or(whole).to_string(),
            }
        })
        .into_owned()
}

/// Layer `updates` over `base`.
///
/// Every value in `updates` is expanded against `base` plus the *raw* values of
/// its siblings in `updates`. A key never sees its own overlay value, so a
/// self-reference resolves against `base` (or the process environment) only.
/// Each key's context is assembled independently, so declaration order does
/// not affect the result.
pub fn mergevars(base: &Environment, updates: &Environment) -> Environment {
    let mut result = base.clone();

    for (key, value) in updates {
        let mut context = base.clone();
        for (sibling, raw) in updates {
            if sibling != key {
                context.insert(sibling.clone(), raw.clone());
            }
        }
        result.insert(key.clone(), expand(value, &context));
    }

    result
}
