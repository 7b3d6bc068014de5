//! Request framing and the evaluator-side helper.

use guix_bridge_core::value::quote_string;

/// Name of the helper procedure that evaluates one request.
pub const EVAL_PROCEDURE: &str = "guix-bridge-eval";

const HELPER_SOURCE: &str = include_str!("../scheme/guix-bridge.scm");

/// The helper definitions as one `begin` form on a single line, so the REPL
/// answers with exactly one prompt.
#[must_use]
pub fn helper_definition() -> String {
    let body = HELPER_SOURCE
        .lines()
        .filter(|line| !line.trim_start().starts_with(';'))
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    format!("(begin {body})")
}

/// Group several top-level forms so they evaluate as one unit.
#[must_use]
pub fn wrap_in_begin(source: &str) -> String {
    format!("(begin {source})")
}

/// The line sent to the REPL to evaluate `source` through the helper.
#[must_use]
pub fn eval_request(source: &str) -> String {
    format!("({EVAL_PROCEDURE} {})", quote_string(source))
}
