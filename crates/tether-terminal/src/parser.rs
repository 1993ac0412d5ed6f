//! Line splitting: sequencing operators, redirection, and pipes.
//!
//! All three scanners ignore operator characters inside single or double
//! quotes and after a backslash, so `echo "a;b"` stays one command.

use std::path::PathBuf;

use crate::writer::WriteMode;

/// Byte offsets and characters of every unquoted, unescaped character.
fn unquoted_chars(input: &str) -> Vec<(usize, char)> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some((i, ch)) = chars.next() {
        if in_single {
            if ch == '\'' {
                in_single = false;
            }
            continue;
        }
        if in_double {
            if ch == '"' {
                in_double = false;
            } else if ch == '\\' {
                chars.next();
            }
            continue;
        }
        match ch {
            '\'' => in_single = true,
            '"' => in_double = true,
            '\\' => {
                chars.next();
            },
            _ => out.push((i, ch)),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Sequencing: ; and &&
// ---------------------------------------------------------------------------

/// Split a line on the sequencing operators `;` and `&&`.
///
/// Both operators have the same meaning: every segment runs, left to
/// right, whatever happened to the previous one. Segments are trimmed and
/// empty segments are dropped.
pub fn split_sequence(input: &str) -> Vec<String> {
    let positions = unquoted_chars(input);
    let mut segments = Vec::new();
    let mut start = 0;
    let mut idx = 0;

    while idx < positions.len() {
        let (pos, ch) = positions[idx];
        let op_len = match ch {
            ';' => 1,
            '&' if positions
                .get(idx + 1)
                .is_some_and(|&(next_pos, next)| next == '&' && next_pos == pos + 1) =>
            {
                2
            },
            _ => 0,
        };
        if op_len > 0 {
            push_trimmed(&mut segments, &input[start..pos]);
            start = pos + op_len;
            idx += op_len;
        } else {
            idx += 1;
        }
    }
    push_trimmed(&mut segments, &input[start..]);
    segments
}

fn push_trimmed(segments: &mut Vec<String>, part: &str) {
    let part = part.trim();
    if !part.is_empty() {
        segments.push(part.to_string());
    }
}

// ---------------------------------------------------------------------------
// Redirection: > and >>
// ---------------------------------------------------------------------------

/// Output redirection attached to a whole command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Target path exactly as typed (resolved later against the cwd).
    pub target: PathBuf,
    pub mode: WriteMode,
}

/// Split a trailing `>>` or `>` off a command line.
///
/// The rightmost unquoted `>>` wins; only when there is none is the
/// rightmost lone `>` used. Only one redirection per line is recognized,
/// so anything after the operator is taken as the target path.
pub fn parse_redirect(input: &str) -> (&str, Option<Redirect>) {
    let positions = unquoted_chars(input);
    let mut last_append: Option<usize> = None;
    let mut last_overwrite: Option<usize> = None;
    let mut idx = 0;

    while idx < positions.len() {
        let (pos, ch) = positions[idx];
        if ch == '>' {
            let doubled = positions
                .get(idx + 1)
                .is_some_and(|&(next_pos, next)| next == '>' && next_pos == pos + 1);
            if doubled {
                last_append = Some(pos);
                idx += 2;
                continue;
            }
            last_overwrite = Some(pos);
        }
        idx += 1;
    }

    let (pos, op_len, mode) = match (last_append, last_overwrite) {
        (Some(pos), _) => (pos, 2, WriteMode::Append),
        (None, Some(pos)) => (pos, 1, WriteMode::Overwrite),
        (None, None) => return (input, None),
    };
    let target = input[pos + op_len..].trim();
    let target = target.trim_matches(|c| c == '"' || c == '\'');
    (
        input[..pos].trim(),
        Some(Redirect {
            target: PathBuf::from(target),
            mode,
        }),
    )
}

// ---------------------------------------------------------------------------
// Pipes
// ---------------------------------------------------------------------------

/// Split on unquoted `|`, trimming each segment and dropping empty ones.
pub fn split_pipes(input: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (pos, ch) in unquoted_chars(input) {
        if ch == '|' {
            push_trimmed(&mut segments, &input[start..pos]);
            start = pos + 1;
        }
    }
    push_trimmed(&mut segments, &input[start..]);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_semicolon() {
        assert_eq!(split_sequence("echo a ; echo b"), vec!["echo a", "echo b"]);
    }

    #[test]
    fn sequence_and() {
        assert_eq!(split_sequence("echo a&&echo b"), vec!["echo a", "echo b"]);
    }

    #[test]
    fn sequence_mixed_operators_left_to_right() {
        assert_eq!(
            split_sequence("a && b ; c && d"),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn sequence_drops_empty_segments() {
        assert_eq!(split_sequence(";; echo a ;  ; "), vec!["echo a"]);
    }

    #[test]
    fn sequence_ignores_quoted_operators() {
        assert_eq!(
            split_sequence("echo 'a;b' ; echo \"c && d\""),
            vec!["echo 'a;b'", "echo \"c && d\""]
        );
    }

    #[test]
    fn sequence_single_ampersand_is_not_operator() {
        assert_eq!(split_sequence("echo a & b"), vec!["echo a & b"]);
    }

    #[test]
    fn sequence_many_operators_is_flat() {
        let line = vec!["echo x"; 500].join(" ; ");
        assert_eq!(split_sequence(&line).len(), 500);
    }

    #[test]
    fn redirect_overwrite() {
        let (cmd, redir) = parse_redirect("echo hello > out.txt");
        assert_eq!(cmd, "echo hello");
        let redir = redir.unwrap();
        assert_eq!(redir.target, PathBuf::from("out.txt"));
        assert_eq!(redir.mode, WriteMode::Overwrite);
    }

    #[test]
    fn redirect_append() {
        let (cmd, redir) = parse_redirect("cat a | sort >> log.txt");
        assert_eq!(cmd, "cat a | sort");
        let redir = redir.unwrap();
        assert_eq!(redir.target, PathBuf::from("log.txt"));
        assert_eq!(redir.mode, WriteMode::Append);
    }

    #[test]
    fn redirect_append_preferred_over_later_overwrite() {
        let (cmd, redir) = parse_redirect("echo a >> b > c");
        assert_eq!(cmd, "echo a");
        let redir = redir.unwrap();
        assert_eq!(redir.mode, WriteMode::Append);
        assert_eq!(redir.target, PathBuf::from("b > c"));
    }

    #[test]
    fn redirect_rightmost_overwrite() {
        let (cmd, redir) = parse_redirect("echo a > b > c");
        assert_eq!(cmd, "echo a > b");
        assert_eq!(redir.unwrap().target, PathBuf::from("c"));
    }

    #[test]
    fn redirect_quoted_is_ignored() {
        let (cmd, redir) = parse_redirect("echo '1 > 0'");
        assert_eq!(cmd, "echo '1 > 0'");
        assert!(redir.is_none());
    }

    #[test]
    fn redirect_quoted_target() {
        let (_, redir) = parse_redirect("echo hi > \"my file.txt\"");
        assert_eq!(redir.unwrap().target, PathBuf::from("my file.txt"));
    }

    #[test]
    fn no_redirect() {
        let (cmd, redir) = parse_redirect("ls -l");
        assert_eq!(cmd, "ls -l");
        assert!(redir.is_none());
    }

    #[test]
    fn pipes_split_and_trim() {
        assert_eq!(
            split_pipes("cat f |sort|  uniq "),
            vec!["cat f", "sort", "uniq"]
        );
    }

    #[test]
    fn pipes_quoted_bar_kept() {
        assert_eq!(split_pipes("echo 'a|b' | sort"), vec!["echo 'a|b'", "sort"]);
    }

    #[test]
    fn pipes_empty_segments_dropped() {
        assert_eq!(split_pipes("echo a || sort"), vec!["echo a", "sort"]);
    }
}
