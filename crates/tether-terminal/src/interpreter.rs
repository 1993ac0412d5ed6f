//! Command trait, registry, and the helpers every command shares.
//!
//! Registry commands never print. They hand their text back as a
//! `CommandOutput` value, so two sessions running commands at the same
//! time cannot see each other's output.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use tether_types::error::{Result, TetherError};

use crate::writer::WriteMode;

/// A request from a command to move the session into another mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Open the line editor on a file.
    Edit { path: PathBuf },
    /// Start capturing lines for a file.
    Write { path: PathBuf, mode: WriteMode },
    /// Close the connection.
    Exit,
}

/// Output produced by a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    /// Plain text lines.
    Text(String),
    /// Tabular data (header row + data rows).
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// Command produced no visible output.
    None,
    /// Session transition for the shell to apply.
    Signal(Signal),
}

impl CommandOutput {
    /// Convert textual output into lines.
    ///
    /// Returns `None` when there is no text to feed forward: for
    /// `CommandOutput::None` and for signals.
    pub fn into_lines(self) -> Option<Vec<String>> {
        match self {
            CommandOutput::Text(text) => Some(text.lines().map(str::to_string).collect()),
            CommandOutput::Table { headers, rows } => Some(render_table(&headers, &rows)),
            CommandOutput::None | CommandOutput::Signal(_) => None,
        }
    }
}

/// Lay out a table with left-aligned, space-padded columns.
fn render_table(headers: &[String], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(len),
                None => widths.push(len),
            }
        }
    }
    let format_row = |cells: &[String]| {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            let width = widths.get(i).copied().unwrap_or(0);
            line.push_str(&format!("{cell:width$}"));
        }
        line.trim_end().to_string()
    };
    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(format_row(headers));
    for row in rows {
        out.push(format_row(row));
    }
    out
}

/// Per-invocation environment passed to every command.
pub struct Environment<'a> {
    /// Working directory of the calling session.
    pub cwd: PathBuf,
    /// The calling session's command history, oldest first.
    pub history: &'a [String],
}

/// A single executable registry command.
pub trait Command: Send + Sync {
    /// The command name (what the user types). Case-sensitive.
    fn name(&self) -> &str;

    /// One-line description for `help`.
    fn description(&self) -> &str;

    /// Usage string (e.g. "ls \[path\]").
    fn usage(&self) -> &str;

    /// Command category for grouping in `help` output.
    fn category(&self) -> &str {
        "general"
    }

    /// Execute the command with the given arguments and environment.
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput>;
}

/// Name of the registry-level help command, answered by the registry itself.
const HELP: &str = "help";

/// Closed table of registry commands, fixed once the server starts.
pub struct CommandRegistry {
    commands: HashMap<String, Box<dyn Command>>,
}

impl CommandRegistry {
    /// Create an empty command registry.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a command. Replaces any existing command with the same name.
    pub fn register(&mut self, cmd: Box<dyn Command>) {
        self.commands.insert(cmd.name().to_string(), cmd);
    }

    /// Whether `name` resolves to a registry command.
    pub fn contains(&self, name: &str) -> bool {
        name == HELP || self.commands.contains_key(name)
    }

    /// Invoke a registry command by name.
    pub fn invoke(
        &self,
        name: &str,
        args: &[&str],
        env: &mut Environment<'_>,
    ) -> Result<CommandOutput> {
        if name == HELP {
            return self.execute_help(args);
        }
        match self.commands.get(name) {
            Some(cmd) => cmd.execute(args, env),
            None => Err(TetherError::Command(format!("{name}: command not found"))),
        }
    }

    /// Every name the registry answers to, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.push(HELP.to_string());
        names.sort();
        names
    }

    /// Return registry names starting with `partial`.
    pub fn completions(&self, partial: &str) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| name.starts_with(partial))
            .collect()
    }

    fn execute_help(&self, args: &[&str]) -> Result<CommandOutput> {
        if let Some(&name) = args.first() {
            return match self.commands.get(name) {
                Some(cmd) => Ok(CommandOutput::Text(format!(
                    "{} ({})\n  {}\n  Usage: {}",
                    cmd.name(),
                    cmd.category(),
                    cmd.description(),
                    cmd.usage()
                ))),
                None => Err(TetherError::Command(format!("help: no such command: {name}"))),
            };
        }

        let mut categories: BTreeMap<&str, Vec<&dyn Command>> = BTreeMap::new();
        for cmd in self.commands.values() {
            categories
                .entry(cmd.category())
                .or_default()
                .push(cmd.as_ref());
        }

        let mut out = String::from("Supported commands:\n");
        for (cat, cmds) in &mut categories {
            cmds.sort_by_key(|c| c.name());
            out.push_str(&format!("\n  [{cat}]\n"));
            for cmd in cmds.iter() {
                out.push_str(&format!("    {:18} - {}\n", cmd.usage(), cmd.description()));
            }
        }
        out.push_str(
            "\n  [pipeline]\n    cat, sort, uniq    - line filters for use with |\n\n\
             Lines may use ; && | > >> and the wildcards * ?.\n\
             Type 'help <command>' for details.",
        );
        Ok(CommandOutput::Text(out))
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tokenizer: handles single quotes, double quotes, and backslash escapes.
// ---------------------------------------------------------------------------

/// Tokenize a command segment respecting quotes and backslash escapes.
///
/// - Single-quoted strings preserve all characters literally.
/// - Inside double quotes a backslash escapes only `"` and `\`.
/// - Backslash escapes the next character outside of quotes.
pub fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // Distinguishes `''` (an empty word) from no word at all.
    let mut has_token = false;
    let mut chars = input.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(ch) = chars.next() {
        if in_single {
            if ch == '\'' {
                in_single = false;
            } else {
                current.push(ch);
            }
        } else if in_double {
            match ch {
                '"' => in_double = false,
                '\\' => match chars.peek() {
                    Some(&next @ ('"' | '\\')) => {
                        current.push(next);
                        chars.next();
                    },
                    _ => current.push('\\'),
                },
                _ => current.push(ch),
            }
        } else {
            match ch {
                '\'' => {
                    in_single = true;
                    has_token = true;
                },
                '"' => {
                    in_double = true;
                    has_token = true;
                },
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        has_token = true;
                    }
                },
                c if c.is_whitespace() => {
                    if has_token || !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                },
                _ => current.push(ch),
            }
        }
    }

    if in_single {
        return Err(TetherError::Command("unterminated single quote".to_string()));
    }
    if in_double {
        return Err(TetherError::Command("unterminated double quote".to_string()));
    }

    if has_token || !current.is_empty() {
        tokens.push(current);
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Path resolution helper
// ---------------------------------------------------------------------------

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Resolve a possibly-relative path against the working directory.
///
/// A leading `~` expands to the home directory. `.` and `..` components
/// are folded lexically, without touching the filesystem.
pub fn resolve_path(cwd: &Path, input: &str) -> PathBuf {
    let expanded = match input.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(input),
        },
        _ => PathBuf::from(input),
    };
    let raw = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    let mut out = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        out
    }
}
