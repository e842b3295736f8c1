//! `${NAME}` placeholder handling for variable values.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Placeholder always bound to the target environment's namespace.
pub const NAMESPACE_PLACEHOLDER: &str = "${NAMESPACE}";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^{}$]+)\}").unwrap_or_else(|e| panic!("placeholder pattern: {e}"))
});

/// Names referenced by `${NAME}` placeholders, in order of first appearance.
pub fn extract_placeholders(value: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(value) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Replace every `${NAME}` whose name `lookup` resolves.
///
/// Unresolved placeholders stay verbatim and are returned alongside the
/// output. Substituted text is not rescanned.
pub fn substitute_placeholders<'a>(
    value: &str,
    lookup: impl Fn(&str) -> Option<&'a str>,
) -> (String, Vec<String>) {
    let mut unresolved = Vec::new();
    let output = PLACEHOLDER.replace_all(value, |caps: &Captures| match lookup(&caps[1]) {
        Some(resolved) => resolved.to_string(),
        None => {
            unresolved.push(caps[1].to_string());
            caps[0].to_string()
        }
    });
    (output.into_owned(), unresolved)
}
