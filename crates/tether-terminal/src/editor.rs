//! Line editor: load a file, edit it as a numbered line buffer, save on request.
//!
//! Line numbers are 1-based. The buffer only reaches the disk on `:w`;
//! quitting or cancelling drops it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tether_types::error::{Result, TetherError};

pub const HELP_TEXT: &str = "Editor commands:
  :q           -> quit without saving
  :w           -> save changes
  :p           -> print current content
  :d <n>       -> delete line n
  :i <n> <txt> -> insert a line before n
  :r <n> <txt> -> replace line n
  :help        -> show this help";

/// Result of feeding one line to the editor.
#[derive(Debug, PartialEq, Eq)]
pub enum EditorStep {
    /// Stay in the editor and show this text.
    Continue(String),
    /// Leave the editor and show this text.
    Quit(String),
}

/// An open editing session on one file.
#[derive(Debug)]
pub struct Editor {
    path: PathBuf,
    lines: Vec<String>,
}

impl Editor {
    /// Load `path` into a line buffer. A missing file opens an empty buffer.
    pub fn open(path: PathBuf) -> Result<Self> {
        let lines = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(TetherError::resource(&path, e)),
        };
        Ok(Self { path, lines })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Text shown when the editor opens.
    pub fn banner(&self) -> String {
        let mut out = format!(
            "Editing {}. Type ':help' for commands inside editor.",
            self.path.display()
        );
        if self.lines.is_empty() {
            out.push_str("\nFile is empty.");
        } else {
            out.push_str("\nCurrent file content:\n");
            out.push_str(&self.listing());
        }
        out
    }

    fn listing(&self) -> String {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}: {line}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Feed one input line.
    pub fn handle(&mut self, input: &str) -> EditorStep {
        let input = input.trim_end();
        match input {
            ":q" => return EditorStep::Quit("Exiting editor without saving.".to_string()),
            ":w" => return EditorStep::Continue(self.save()),
            ":p" => {
                return EditorStep::Continue(if self.lines.is_empty() {
                    "File is empty.".to_string()
                } else {
                    self.listing()
                });
            },
            ":help" => return EditorStep::Continue(HELP_TEXT.to_string()),
            _ => {},
        }

        let reply = if let Some(rest) = input.strip_prefix(":d ") {
            self.delete(rest)
        } else if let Some(rest) = input.strip_prefix(":i ") {
            self.insert(rest)
        } else if let Some(rest) = input.strip_prefix(":r ") {
            self.replace(rest)
        } else {
            "Unknown editor command. Type ':help' for commands.".to_string()
        };
        EditorStep::Continue(reply)
    }

    fn save(&self) -> String {
        let mut data = self.lines.join("\n");
        data.push('\n');
        match fs::write(&self.path, data) {
            Ok(()) => format!("{} saved successfully.", self.path.display()),
            Err(e) => {
                log::warn!("editor save failed: {e}");
                format!("edit: {}", TetherError::resource(&self.path, e))
            },
        }
    }

    fn delete(&mut self, rest: &str) -> String {
        let Some(n) = rest.split_whitespace().next().and_then(|s| s.parse::<usize>().ok())
        else {
            return "Usage: :d <line_number>".to_string();
        };
        if !(1..=self.lines.len()).contains(&n) {
            return "Invalid line number".to_string();
        }
        let removed = self.lines.remove(n - 1);
        format!("Deleted line {n}: {removed}")
    }

    fn insert(&mut self, rest: &str) -> String {
        let (n, text) = match parse_numbered_text(rest) {
            Ok(parts) => parts,
            Err(msg) => return msg.replace("<cmd>", ":i"),
        };
        if !(1..=self.lines.len() + 1).contains(&n) {
            return "Invalid line number".to_string();
        }
        self.lines.insert(n - 1, text.to_string());
        format!("Inserted at line {n}")
    }

    fn replace(&mut self, rest: &str) -> String {
        let (n, text) = match parse_numbered_text(rest) {
            Ok(parts) => parts,
            Err(msg) => return msg.replace("<cmd>", ":r"),
        };
        if !(1..=self.lines.len()).contains(&n) {
            return "Invalid line number".to_string();
        }
        self.lines[n - 1] = text.to_string();
        format!("Replaced line {n}")
    }
}

/// Split `<n> <text>` where text is everything after the number's
/// trailing whitespace.
fn parse_numbered_text(rest: &str) -> std::result::Result<(usize, &str), String> {
    let rest = rest.trim_start();
    let Some((num, text)) = rest.split_once(char::is_whitespace) else {
        return Err("Insert/Replace text missing.".to_string());
    };
    let text = text.trim_start();
    if text.is_empty() {
        return Err("Insert/Replace text missing.".to_string());
    }
    let n = num
        .parse::<usize>()
        .map_err(|_| "Usage: <cmd> <line_number> <text>".to_string())?;
    Ok((n, text))
}
