//! Command-line compiler: turns one raw input line into output text.
//!
//! Precedence, outermost first: sequencing (`;`, `&&`), redirection
//! (`>`, `>>`), pipes (`|`), then word splitting and wildcard expansion.
//! Sequenced commands all run, left to right, whether or not an earlier
//! one failed; their outputs are concatenated.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tether_types::error::{Result, TetherError};

use crate::interpreter::{CommandRegistry, Environment, Signal, resolve_path};
use crate::parser::{parse_redirect, split_pipes, split_sequence};
use crate::pipeline::{Pipeline, Segment};
use crate::translate::Translator;
use crate::writer::WriteMode;

const HOST_SHELL_PREFIX: &str = "shell ";

/// Result of executing one input line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Execution {
    /// Text to show the user; empty when there is nothing to show.
    pub text: String,
    /// Last session transition requested on the line.
    pub signal: Option<Signal>,
}

/// Compiles and runs command lines against a registry.
pub struct Compiler<'a> {
    registry: &'a CommandRegistry,
    translator: Option<&'a dyn Translator>,
    process_timeout: Option<Duration>,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a CommandRegistry, process_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            translator: None,
            process_timeout,
        }
    }

    /// Fall back to `translator` for single commands nothing can run.
    pub fn with_translator(mut self, translator: Option<&'a dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    /// Execute `line` in `env`. `env.cwd` reflects any `cd` afterwards.
    ///
    /// A line starting with `shell ` goes to the host shell untouched, so
    /// its operators are the host shell's, not ours.
    pub fn execute(&self, line: &str, env: &mut Environment<'_>) -> Execution {
        if let Some(rest) = line.trim_start().strip_prefix(HOST_SHELL_PREFIX)
            && self.registry.contains("shell")
        {
            let text = match self.registry.invoke("shell", &[rest.trim()], env) {
                Ok(output) => output.into_lines().unwrap_or_default().join("\n"),
                Err(e) => e.to_string(),
            };
            return Execution { text, signal: None };
        }
        self.execute_line(line, env, true)
    }

    /// Run every sequenced command. Only one session change survives a
    /// line: the last one requested wins and each earlier one is reported
    /// as ignored.
    fn execute_line(&self, line: &str, env: &mut Environment<'_>, translate: bool) -> Execution {
        let mut lines = Vec::new();
        let mut signal = None;
        for segment in split_sequence(line) {
            let (out, requested) = self.execute_segment(&segment, env, translate);
            lines.extend(out);
            if requested.is_some()
                && let Some(dropped) = std::mem::replace(&mut signal, requested)
            {
                lines.push(format!(
                    "{}: ignored, a later command changed the session",
                    describe(&dropped)
                ));
            }
        }
        Execution {
            text: lines.join("\n"),
            signal,
        }
    }

    /// Run one operator-free command line (may still contain pipes and a
    /// redirection).
    fn execute_segment(
        &self,
        line: &str,
        env: &mut Environment<'_>,
        translate: bool,
    ) -> (Vec<String>, Option<Signal>) {
        let (command, redirect) = parse_redirect(line);

        let mut segments = Vec::new();
        for piece in split_pipes(command) {
            match Segment::parse(&piece, &env.cwd) {
                Ok(Some(segment)) => segments.push(segment),
                Ok(None) => {},
                Err(e) => return (vec![e.to_string()], None),
            }
        }
        if segments.is_empty() {
            return (Vec::new(), None);
        }

        let output = Pipeline::new(self.registry, self.process_timeout).run(&segments, env);

        if translate
            && redirect.is_none()
            && segments.len() == 1
            && output.unresolved.is_some()
            && let Some(translated) = self.translate(line)
        {
            let mut lines = vec![format!("(translated) {translated}")];
            let exec = self.execute_line(&translated, env, false);
            lines.extend(exec.text.lines().map(str::to_string));
            return (lines, exec.signal);
        }

        let signal = output.signal.clone();
        let Some(redirect) = redirect else {
            return (output.into_lines(), signal);
        };

        let mut lines = output.diagnostics;
        if !output.lines.is_empty() {
            let target = resolve_path(&env.cwd, &redirect.target.to_string_lossy());
            lines.push(match write_redirect(&target, redirect.mode, &output.lines) {
                Ok(()) => format!("Output redirected to {}", redirect.target.display()),
                Err(e) => {
                    log::warn!("redirect to {} failed: {e}", target.display());
                    format!("Redirection error: {e}")
                },
            });
        }
        (lines, signal)
    }

    fn translate(&self, line: &str) -> Option<String> {
        let translator = self.translator?;
        match translator.translate(line) {
            Ok(Some(command)) => {
                log::info!("translated {line:?} to {command:?}");
                Some(command)
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("translation failed: {e}");
                None
            },
        }
    }
}

fn describe(signal: &Signal) -> String {
    match signal {
        Signal::Edit { path } => format!("edit {}", path.display()),
        Signal::Write { path, .. } => format!("write {}", path.display()),
        Signal::Exit => "exit".to_string(),
    }
}

/// Write `lines` to `path`, one per line, in the given mode.
fn write_redirect(path: &Path, mode: WriteMode, lines: &[String]) -> Result<()> {
    let mut options = OpenOptions::new();
    match mode {
        WriteMode::Overwrite => options.write(true).create(true).truncate(true),
        WriteMode::Append => options.append(true).create(true),
    };
    let mut file = options
        .open(path)
        .map_err(|e| TetherError::resource(path, e))?;
    let mut data = lines.join("\n");
    data.push('\n');
    file.write_all(data.as_bytes())
        .map_err(|e| TetherError::resource(path, e))
}
