//! Environment variable curation: `curate_env` builds the non-secret
//! string map handed to the expression sandbox, and the allow-listed
//! child-process environment handed to the command provider.

use std::collections::HashMap;

/// Substrings that mark a variable name as sensitive by default. A variable
/// matching one of these is dropped from the curated map unless its exact
/// name appears in `allow_list`.
const SENSITIVE_MARKERS: &[&str] = &[
    "SECRET", "TOKEN", "KEY", "PASSWORD", "PASSWD", "CREDENTIAL", "PRIVATE", "AUTH",
];

fn looks_sensitive(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_MARKERS.iter().any(|m| upper.contains(m))
}

/// Build the curated environment map exposed to expressions as `env` and
/// (optionally) passed through to a sandboxed child process. Variables that
/// look sensitive are dropped unless explicitly allow-listed by name.
pub fn curate_env(source: &HashMap<String, String>, allow_list: &[String]) -> HashMap<String, String> {
    source
        .iter()
        .filter(|(k, _)| allow_list.iter().any(|a| a == *k) || !looks_sensitive(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
