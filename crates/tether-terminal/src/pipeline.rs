//! Pipeline executor: runs `seg1 | seg2 | ...` and threads the output of
//! each segment into the next.
//!
//! Each segment resolves, in order, to a registry command, one of the
//! line-filter builtins, or an external process. Failures of a segment
//! become diagnostic lines; they never abort the pipeline.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tether_types::error::{Result, TetherError};

use crate::glob::expand_globs;
use crate::interpreter::{
    CommandOutput, CommandRegistry, Environment, Signal, resolve_path, tokenize,
};
use crate::process::run_process;

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

/// Line filters implemented in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Cat,
    Sort,
    Uniq,
}

impl Builtin {
    pub const ALL: [Builtin; 3] = [Builtin::Cat, Builtin::Sort, Builtin::Uniq];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cat" => Some(Builtin::Cat),
            "sort" => Some(Builtin::Sort),
            "uniq" => Some(Builtin::Uniq),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Cat => "cat",
            Builtin::Sort => "sort",
            Builtin::Uniq => "uniq",
        }
    }

    /// Apply the filter to piped `input`, or to the named files when there
    /// is no input. Unreadable files are reported in `diagnostics`.
    pub fn apply(
        self,
        input: Option<&[String]>,
        args: &[String],
        cwd: &Path,
        diagnostics: &mut Vec<String>,
    ) -> Vec<String> {
        let mut lines = match input {
            Some(lines) => lines.to_vec(),
            None => {
                if self == Builtin::Cat && args.is_empty() {
                    diagnostics.push("cat: missing file operand".to_string());
                }
                self.read_files(args, cwd, diagnostics)
            },
        };
        match self {
            Builtin::Cat => {},
            Builtin::Sort => lines.sort(),
            Builtin::Uniq => lines.dedup(),
        }
        lines
    }

    fn read_files(self, args: &[String], cwd: &Path, diagnostics: &mut Vec<String>) -> Vec<String> {
        let mut lines = Vec::new();
        for arg in args {
            let path = resolve_path(cwd, arg);
            match fs::read(&path) {
                Ok(bytes) => lines.extend(
                    String::from_utf8_lossy(&bytes)
                        .lines()
                        .map(str::to_string),
                ),
                Err(e) => diagnostics.push(format!(
                    "{}: {}",
                    self.name(),
                    TetherError::resource(arg, e)
                )),
            }
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// One command of a pipeline after tokenizing and glob expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub args: Vec<String>,
}

impl Segment {
    /// Tokenize `text` and expand wildcards against `cwd`.
    ///
    /// Returns `None` for a segment with no words.
    pub fn parse(text: &str, cwd: &Path) -> Result<Option<Self>> {
        let tokens = tokenize(text)?;
        let mut tokens = expand_globs(&tokens, cwd).into_iter();
        Ok(tokens.next().map(|name| Segment {
            name,
            args: tokens.collect(),
        }))
    }
}

/// Everything a pipeline run produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Data lines left after the last segment.
    pub lines: Vec<String>,
    /// Error lines from failing segments and external stderr.
    pub diagnostics: Vec<String>,
    /// Last session transition requested by a registry command.
    pub signal: Option<Signal>,
    /// Name of a segment that resolved nowhere (no registry entry, no
    /// builtin, no program on the search path).
    pub unresolved: Option<String>,
}

impl PipelineOutput {
    /// Diagnostics first, then data.
    pub fn into_lines(self) -> Vec<String> {
        let mut out = self.diagnostics;
        out.extend(self.lines);
        out
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs pipelines against a registry.
pub struct Pipeline<'r> {
    registry: &'r CommandRegistry,
    process_timeout: Option<Duration>,
}

impl<'r> Pipeline<'r> {
    pub fn new(registry: &'r CommandRegistry, process_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            process_timeout,
        }
    }

    /// Run `segments` left to right.
    pub fn run(&self, segments: &[Segment], env: &mut Environment<'_>) -> PipelineOutput {
        let mut out = PipelineOutput::default();
        // Empty output counts as no output for the next segment.
        let mut prev: Vec<String> = Vec::new();

        for segment in segments {
            let input = (!prev.is_empty()).then_some(prev.as_slice());
            log::debug!("pipeline segment: {} {:?}", segment.name, segment.args);

            if self.registry.contains(&segment.name) {
                let args: Vec<&str> = segment.args.iter().map(String::as_str).collect();
                match self.registry.invoke(&segment.name, &args, env) {
                    Ok(CommandOutput::Signal(signal)) => {
                        out.signal = Some(signal);
                    },
                    Ok(output) => {
                        if let Some(lines) = output.into_lines() {
                            prev = lines;
                        }
                    },
                    Err(e) => out.diagnostics.push(registry_diagnostic(&segment.name, &e)),
                }
            } else if let Some(builtin) = Builtin::from_name(&segment.name) {
                prev = builtin.apply(input, &segment.args, &env.cwd, &mut out.diagnostics);
            } else {
                prev = self.run_external(segment, input, &env.cwd, &mut out);
            }
        }

        out.lines = prev;
        out
    }

    fn run_external(
        &self,
        segment: &Segment,
        input: Option<&[String]>,
        cwd: &Path,
        out: &mut PipelineOutput,
    ) -> Vec<String> {
        let mut argv = Vec::with_capacity(segment.args.len() + 1);
        argv.push(segment.name.clone());
        argv.extend(segment.args.iter().cloned());
        let stdin = input.map(|lines| {
            let mut text = lines.join("\n");
            text.push('\n');
            text
        });

        match run_process(&argv, cwd, stdin.as_deref(), self.process_timeout) {
            Ok(result) => {
                out.diagnostics
                    .extend(result.stderr.lines().map(str::to_string));
                if result.timed_out() {
                    out.diagnostics.push(format!(
                        "{}: killed after {}s",
                        segment.name,
                        self.process_timeout.map_or(0, |t| t.as_secs())
                    ));
                }
                result.stdout.lines().map(str::to_string).collect()
            },
            Err(TetherError::Command(msg)) => {
                out.unresolved = Some(segment.name.clone());
                out.diagnostics.push(msg);
                Vec::new()
            },
            Err(e) => {
                log::warn!("external command {} failed: {e}", segment.name);
                out.diagnostics.push(format!("{}: {e}", segment.name));
                Vec::new()
            },
        }
    }
}

/// Registry errors already naming their command are shown as-is.
fn registry_diagnostic(name: &str, err: &TetherError) -> String {
    let msg = err.to_string();
    if msg.starts_with(&format!("{name}:")) {
        msg
    } else {
        format!("{name}: {msg}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Command;
    use std::path::PathBuf;

    struct EchoCmd;
    impl Command for EchoCmd {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Print arguments"
        }
        fn usage(&self) -> &str {
            "echo [text...]"
        }
        fn execute(&self, args: &[&str], _env: &mut Environment<'_>) -> Result<CommandOutput> {
            Ok(CommandOutput::Text(args.join(" ")))
        }
    }

    struct FailCmd;
    impl Command for FailCmd {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn usage(&self) -> &str {
            "fail"
        }
        fn execute(&self, _args: &[&str], _env: &mut Environment<'_>) -> Result<CommandOutput> {
            Err(TetherError::Command("broken".to_string()))
        }
    }

    fn registry() -> CommandRegistry {
        let mut reg = CommandRegistry::new();
        reg.register(Box::new(EchoCmd));
        reg.register(Box::new(FailCmd));
        reg
    }

    fn segments(line: &str, cwd: &Path) -> Vec<Segment> {
        crate::parser::split_pipes(line)
            .iter()
            .filter_map(|s| Segment::parse(s, cwd).unwrap())
            .collect()
    }

    fn run(line: &str, cwd: &Path) -> PipelineOutput {
        let reg = registry();
        let mut env = Environment {
            cwd: cwd.to_path_buf(),
            history: &[],
        };
        Pipeline::new(&reg, Some(Duration::from_secs(10))).run(&segments(line, cwd), &mut env)
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builtin_names() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_name(b.name()), Some(b));
        }
        assert_eq!(Builtin::from_name("grep"), None);
    }

    #[test]
    fn uniq_only_collapses_neighbours() {
        let mut diags = Vec::new();
        let input = lines(&["a", "a", "b", "a"]);
        let out = Builtin::Uniq.apply(Some(&input), &[], Path::new("/"), &mut diags);
        assert_eq!(out, lines(&["a", "b", "a"]));
    }

    #[test]
    fn sort_is_lexicographic() {
        let mut diags = Vec::new();
        let input = lines(&["b", "B", "a", "10", "9"]);
        let out = Builtin::Sort.apply(Some(&input), &[], Path::new("/"), &mut diags);
        assert_eq!(out, lines(&["10", "9", "B", "a", "b"]));
    }

    #[test]
    fn cat_sort_uniq_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "b\na\na\nc\n").unwrap();
        let out = run("cat f | sort | uniq", dir.path());
        assert_eq!(out.lines, lines(&["a", "b", "c"]));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn builtin_reads_files_without_input() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x"), "2\n1\n").unwrap();
        let out = run("sort x", dir.path());
        assert_eq!(out.lines, lines(&["1", "2"]));
    }

    #[test]
    fn missing_file_is_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let out = run("cat nope.txt", dir.path());
        assert!(out.lines.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].starts_with("cat: nope.txt: "));
    }

    #[test]
    fn cat_without_operand() {
        let dir = tempfile::tempdir().unwrap();
        let out = run("cat", dir.path());
        assert_eq!(out.diagnostics, lines(&["cat: missing file operand"]));
    }

    #[test]
    fn registry_output_feeds_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let out = run("echo b | sort", dir.path());
        assert_eq!(out.lines, lines(&["b"]));
    }

    #[test]
    fn registry_error_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = run("echo kept | fail", dir.path());
        assert_eq!(out.lines, lines(&["kept"]));
        assert_eq!(out.diagnostics, lines(&["fail: broken"]));
    }

    #[test]
    fn glob_expanded_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.txt"), "1\n").unwrap();
        fs::write(dir.path().join("two.txt"), "2\n").unwrap();
        let out = run("echo *.txt", dir.path());
        assert_eq!(out.lines, lines(&["one.txt two.txt"]));
    }

    #[test]
    fn segment_parse_empty() {
        assert_eq!(Segment::parse("   ", Path::new("/")).unwrap(), None);
        let seg = Segment::parse("ls -l 'a b'", Path::new("/")).unwrap().unwrap();
        assert_eq!(seg.name, "ls");
        assert_eq!(seg.args, lines(&["-l", "a b"]));
    }

    #[cfg(unix)]
    #[test]
    fn external_process_reads_piped_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = run("echo hello | tr a-z A-Z", dir.path());
        assert_eq!(out.lines, lines(&["HELLO"]));
    }

    #[cfg(unix)]
    #[test]
    fn external_stderr_is_diagnostic_not_data() {
        let dir = tempfile::tempdir().unwrap();
        let out = run("sh -c 'echo data; echo oops >&2'", dir.path());
        assert_eq!(out.lines, lines(&["data"]));
        assert_eq!(out.diagnostics, lines(&["oops"]));
    }

    #[test]
    fn unknown_program_is_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let out = run("no-such-program-zzz arg", dir.path());
        assert_eq!(out.unresolved.as_deref(), Some("no-such-program-zzz"));
        assert_eq!(
            out.diagnostics,
            lines(&["no-such-program-zzz: command not found"])
        );
    }

    #[test]
    fn into_lines_puts_diagnostics_first() {
        let out = PipelineOutput {
            lines: lines(&["data"]),
            diagnostics: lines(&["warn"]),
            signal: None,
            unresolved: None,
        };
        assert_eq!(out.into_lines(), lines(&["warn", "data"]));
    }

    #[test]
    fn registry_signal_is_recorded() {
        struct ExitCmd;
        impl Command for ExitCmd {
            fn name(&self) -> &str {
                "exit"
            }
            fn description(&self) -> &str {
                "Leave"
            }
            fn usage(&self) -> &str {
                "exit"
            }
            fn execute(&self, _: &[&str], _: &mut Environment<'_>) -> Result<CommandOutput> {
                Ok(CommandOutput::Signal(Signal::Exit))
            }
        }
        let mut reg = registry();
        reg.register(Box::new(ExitCmd));
        let mut env = Environment {
            cwd: PathBuf::from("/"),
            history: &[],
        };
        let segs = segments("exit", Path::new("/"));
        let out = Pipeline::new(&reg, None).run(&segs, &mut env);
        assert_eq!(out.signal, Some(Signal::Exit));
    }
}
