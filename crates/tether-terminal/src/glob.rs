//! Wildcard expansion against the real filesystem.
//!
//! Only the last path component may contain `*` or `?`. Matches keep the
//! form the user typed (relative patterns give relative paths) and are
//! sorted. A pattern that matches nothing is passed through unchanged.

use std::fs;
use std::path::Path;

use crate::interpreter::resolve_path;

/// Whether a token contains a wildcard character.
pub fn is_glob(token: &str) -> bool {
    token.contains('*') || token.contains('?')
}

/// Expand glob patterns (`*` and `?`) in tokens against `cwd`.
pub fn expand_globs(tokens: &[String], cwd: &Path) -> Vec<String> {
    let mut result = Vec::with_capacity(tokens.len());
    for token in tokens {
        if is_glob(token) {
            let expanded = expand_one_glob(token, cwd);
            if expanded.is_empty() {
                result.push(token.clone());
            } else {
                result.extend(expanded);
            }
        } else {
            result.push(token.clone());
        }
    }
    result
}

/// Expand a single glob pattern.
fn expand_one_glob(pattern: &str, cwd: &Path) -> Vec<String> {
    let (dir_part, file_pattern) = match pattern.rsplit_once('/') {
        Some((d, f)) => (Some(if d.is_empty() { "/" } else { d }), f),
        None => (None, pattern),
    };

    // Wildcards in directory components are not supported.
    if dir_part.is_some_and(is_glob) {
        return Vec::new();
    }

    let dir = resolve_path(cwd, dir_part.unwrap_or("."));
    let entries = match fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("glob: cannot read {}: {e}", dir.display());
            return Vec::new();
        },
    };

    let show_hidden = file_pattern.starts_with('.');
    let mut matches: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| show_hidden || !name.starts_with('.'))
        .filter(|name| glob_match(file_pattern, name))
        .map(|name| match dir_part {
            Some("/") => format!("/{name}"),
            Some(d) => format!("{d}/{name}"),
            None => name,
        })
        .collect();
    matches.sort();
    matches
}

/// Glob matching: `*` matches any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative matcher with single-star backtracking; linear in practice
    // and immune to stack exhaustion on long patterns.
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || (p[pi] != '*' && p[pi] == t[ti])) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
