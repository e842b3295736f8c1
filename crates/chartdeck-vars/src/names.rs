//! Key-path normalization for override names.

/// Prefixes passed through to the backend untouched.
const PASSTHROUGH_PREFIXES: [&str; 3] = ["istio.", "image.", "service."];

/// Map a variable name onto the key path the chart expects.
///
/// Names under `istio.`, `image.` or `service.` address chart-level values
/// directly; everything else lives under `app.`.
pub fn normalize_variable_name(name: &str) -> String {
    if PASSTHROUGH_PREFIXES.iter().any(|p| name.starts_with(p)) {
        name.to_string()
    } else {
        format!("app.{name}")
    }
}
