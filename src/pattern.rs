// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Brace-list topic pattern expansion.
//!
//! A pattern like `sensors/{north,south}/temp` denotes the concrete topics
//! `sensors/north/temp` and `sensors/south/temp`. A pattern may contain
//! several groups; expansion is the left-to-right cartesian product of all
//! alternatives.

/// Expand a brace-list pattern into the concrete strings it denotes.
///
/// The first `{` and the first `}` after it delimit one group. The prefix
/// and suffix around the group are held constant while each comma-separated
/// alternative is substituted, and the result is expanded recursively to
/// handle any remaining groups. A pattern without a brace pair expands to
/// itself.
///
/// There is no escape syntax: a literal `{` or `}` in a topic cannot be
/// expressed.
pub fn expand(pattern: &str) -> Vec<String> {
    let (open, close) = match (pattern.find('{'), pattern.find('}')) {
        (Some(open), Some(close)) if open < close => (open, close),
        _ => return vec![pattern.to_string()],
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];

    let mut results = Vec::new();
    for alternative in pattern[open + 1..close].split(',') {
        let candidate = format!("{}{}{}", prefix, alternative, suffix);
        results.extend(expand(&candidate));
    }

    results
}
