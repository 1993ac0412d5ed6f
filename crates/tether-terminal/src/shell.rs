//! Session front-end: routes each input of a session to the compiler, the
//! line editor, or the writer, and answers the out-of-band requests
//! (history recall, completion, interrupt).

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tether_types::config::ShellConfig;

use crate::compiler::Compiler;
use crate::editor::EditorStep;
use crate::interpreter::{CommandRegistry, Environment, Signal};
use crate::pipeline::Builtin;
use crate::session::{Mode, Session};
use crate::translate::Translator;
use crate::writer::WriterStep;

/// One decoded input from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A full line typed by the user.
    Line(String),
    HistoryPrev,
    HistoryNext,
    /// Completion request for a word prefix.
    Complete(String),
    /// Ctrl-C.
    Interrupt,
}

/// The prompt shown after a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Shell(PathBuf),
    Edit,
    Write,
}

impl Prompt {
    pub fn for_session(session: &Session) -> Self {
        match session.mode() {
            Mode::Idle => Prompt::Shell(session.cwd().to_path_buf()),
            Mode::Editing(_) => Prompt::Edit,
            Mode::Writing(_) => Prompt::Write,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Prompt::Shell(cwd) => format!("{}$ ", cwd.display()),
            Prompt::Edit => "(edit) > ".to_string(),
            Prompt::Write => "(write) > ".to_string(),
        }
    }
}

/// What to send back for one input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    /// Text to display, if any.
    pub output: Option<String>,
    /// Prompt to show afterwards; `None` for suggestion-only answers.
    pub prompt: Option<Prompt>,
    /// Close the connection after sending.
    pub close: bool,
}

impl Reply {
    fn turn(output: Option<String>, session: &Session) -> Self {
        Self {
            output: output.filter(|s| !s.is_empty()),
            prompt: Some(Prompt::for_session(session)),
            close: false,
        }
    }

    fn suggestion(text: Option<String>) -> Self {
        Self {
            output: text,
            prompt: None,
            close: false,
        }
    }
}

/// Shared, read-only command machinery used by every session.
pub struct Shell {
    registry: CommandRegistry,
    process_timeout: Option<Duration>,
    translator: Option<Box<dyn Translator>>,
}

impl Shell {
    pub fn new(registry: CommandRegistry, config: &ShellConfig) -> Self {
        Self {
            registry,
            process_timeout: config.process_timeout(),
            translator: None,
        }
    }

    pub fn with_translator(mut self, translator: Box<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Every command word the shell understands, sorted.
    pub fn vocabulary(registry: &CommandRegistry) -> Vec<String> {
        let mut words: BTreeSet<String> = registry.names().into_iter().collect();
        words.extend(Builtin::ALL.iter().map(|b| b.name().to_string()));
        words.into_iter().collect()
    }

    /// Handle one input for `session`.
    pub fn handle(&self, session: &mut Session, input: Input) -> Reply {
        match input {
            Input::Line(line) => self.handle_line(session, &line),
            Input::HistoryPrev => Reply::suggestion(session.history_prev().map(str::to_string)),
            Input::HistoryNext => Reply::suggestion(session.history_next().map(str::to_string)),
            Input::Complete(prefix) => Reply::suggestion(Some(self.complete(session, &prefix))),
            Input::Interrupt => {
                let text = if session.cancel() {
                    "^C\n(Edit cancelled)"
                } else {
                    "^C"
                };
                Reply::turn(Some(text.to_string()), session)
            },
        }
    }

    fn handle_line(&self, session: &mut Session, line: &str) -> Reply {
        if session.is_idle() {
            return self.run_command(session, line);
        }

        let (output, finished) = match session.mode_mut() {
            Mode::Editing(editor) => match editor.handle(line) {
                EditorStep::Continue(text) => (Some(text), false),
                EditorStep::Quit(text) => (Some(text), true),
            },
            Mode::Writing(writer) => match writer.handle(line) {
                WriterStep::Captured => (None, false),
                WriterStep::Finished(text) => (Some(text), true),
            },
            Mode::Idle => (None, false),
        };
        if finished {
            session.finish();
        }
        Reply::turn(output, session)
    }

    fn run_command(&self, session: &mut Session, line: &str) -> Reply {
        let line = line.trim();
        if line.is_empty() {
            return Reply::turn(None, session);
        }
        session.push_history(line);
        log::debug!("session {} runs {line:?}", session.id());

        let history = session.history();
        let mut env = Environment {
            cwd: session.cwd().to_path_buf(),
            history: &history,
        };
        let exec = Compiler::new(&self.registry, self.process_timeout)
            .with_translator(self.translator.as_deref())
            .execute(line, &mut env);
        session.set_cwd(env.cwd);

        let mut parts: Vec<String> = Vec::new();
        if !exec.text.is_empty() {
            parts.push(exec.text);
        }
        match exec.signal {
            None => {},
            Some(Signal::Exit) => {
                parts.push("Bye!".to_string());
                return Reply {
                    output: Some(parts.join("\n")),
                    prompt: None,
                    close: true,
                };
            },
            Some(Signal::Edit { path }) => parts.push(match session.begin_edit(path) {
                Ok(editor) => editor.banner(),
                Err(e) => format!("edit: {e}"),
            }),
            Some(Signal::Write { path, mode }) => parts.push(match session.begin_write(path, mode) {
                Ok(writer) => writer.banner(),
                Err(e) => format!("write: {e}"),
            }),
        }
        Reply::turn(Some(parts.join("\n")), session)
    }

    /// First command word or cwd entry starting with `prefix`, in sorted
    /// order, else `prefix` itself.
    fn complete(&self, session: &Session, prefix: &str) -> String {
        let mut candidates: BTreeSet<String> =
            self.registry.completions(prefix).into_iter().collect();
        candidates.extend(
            Builtin::ALL
                .iter()
                .map(|b| b.name())
                .filter(|name| name.starts_with(prefix))
                .map(str::to_string),
        );
        match fs::read_dir(session.cwd()) {
            Ok(entries) => candidates.extend(
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.starts_with(prefix)),
            ),
            Err(e) => log::debug!("completion: cannot read {}: {e}", session.cwd().display()),
        }
        candidates
            .pop_first()
            .unwrap_or_else(|| prefix.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::register_builtins;
    use crate::session::{SessionManager, lock_session};
    use std::path::Path;

    fn shell() -> Shell {
        let mut reg = CommandRegistry::new();
        register_builtins(&mut reg, Some(Duration::from_secs(10)));
        Shell::new(reg, &ShellConfig::default())
    }

    fn session_in(dir: &Path) -> Session {
        let mgr = SessionManager::new(dir.to_path_buf(), 100);
        let (id, _) = mgr.open();
        Session::new(id, dir.to_path_buf(), 100)
    }

    fn line(sh: &Shell, s: &mut Session, text: &str) -> Reply {
        sh.handle(s, Input::Line(text.to_string()))
    }

    fn output(reply: &Reply) -> &str {
        reply.output.as_deref().unwrap_or("")
    }

    #[test]
    fn prompt_rendering() {
        assert_eq!(Prompt::Shell(PathBuf::from("/home/u")).render(), "/home/u$ ");
        assert_eq!(Prompt::Edit.render(), "(edit) > ");
        assert_eq!(Prompt::Write.render(), "(write) > ");
    }

    #[test]
    fn empty_line_only_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());
        let reply = line(&sh, &mut s, "   ");
        assert_eq!(reply.output, None);
        assert_eq!(reply.prompt, Some(Prompt::Shell(dir.path().to_path_buf())));
        assert!(s.history().is_empty());
    }

    #[test]
    fn write_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());

        let reply = line(&sh, &mut s, "write notes.txt");
        assert!(output(&reply).starts_with("Writing to "));
        assert_eq!(reply.prompt, Some(Prompt::Write));

        let reply = line(&sh, &mut s, "a");
        assert_eq!(reply.output, None);
        assert_eq!(reply.prompt, Some(Prompt::Write));
        line(&sh, &mut s, "b");

        let reply = line(&sh, &mut s, ".");
        assert!(output(&reply).ends_with("saved successfully."));
        assert!(s.is_idle());
        assert_eq!(
            fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "a\nb\n"
        );
    }

    #[test]
    fn edit_session_save_and_quit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), "one\n").unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());

        let reply = line(&sh, &mut s, "edit f.txt");
        assert!(output(&reply).contains("1: one"));
        assert_eq!(reply.prompt, Some(Prompt::Edit));

        line(&sh, &mut s, ":i 2 two");
        let reply = line(&sh, &mut s, ":w");
        assert!(output(&reply).ends_with("saved successfully."));
        assert_eq!(reply.prompt, Some(Prompt::Edit));

        let reply = line(&sh, &mut s, ":q");
        assert_eq!(output(&reply), "Exiting editor without saving.");
        assert!(s.is_idle());
        assert_eq!(
            fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "one\ntwo\n"
        );
    }

    #[test]
    fn editor_lines_are_not_commands() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());
        line(&sh, &mut s, "edit x.txt");
        let reply = line(&sh, &mut s, "rm -rf /");
        assert!(output(&reply).starts_with("Unknown editor command"));
        assert_eq!(s.history(), vec!["edit x.txt"]);
    }

    #[test]
    fn interrupt_cancels_writer() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());
        line(&sh, &mut s, "write w.txt");
        line(&sh, &mut s, "pending");
        let reply = sh.handle(&mut s, Input::Interrupt);
        assert_eq!(output(&reply), "^C\n(Edit cancelled)");
        assert!(s.is_idle());
        assert!(!dir.path().join("w.txt").exists());

        let reply = sh.handle(&mut s, Input::Interrupt);
        assert_eq!(output(&reply), "^C");
    }

    #[test]
    fn exit_closes() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());
        let reply = line(&sh, &mut s, "echo later ; exit");
        assert!(reply.close);
        assert_eq!(reply.prompt, None);
        assert_eq!(output(&reply), "later\nBye!");
    }

    #[test]
    fn history_recall() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());
        assert_eq!(sh.handle(&mut s, Input::HistoryPrev), Reply::default());
        line(&sh, &mut s, "echo 1");
        line(&sh, &mut s, "echo 2");
        let reply = sh.handle(&mut s, Input::HistoryPrev);
        assert_eq!(reply.output.as_deref(), Some("echo 2"));
        assert_eq!(reply.prompt, None);
        let reply = sh.handle(&mut s, Input::HistoryPrev);
        assert_eq!(reply.output.as_deref(), Some("echo 1"));
        let reply = sh.handle(&mut s, Input::HistoryNext);
        assert_eq!(reply.output.as_deref(), Some("echo 2"));
    }

    #[test]
    fn completion_prefers_first_sorted_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("report.txt"), "").unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());
        let complete = |s: &mut Session, p: &str| {
            sh.handle(s, Input::Complete(p.to_string())).output.unwrap()
        };
        assert_eq!(complete(&mut s, "ec"), "echo");
        assert_eq!(complete(&mut s, "rep"), "report.txt");
        assert_eq!(complete(&mut s, "so"), "sort");
        assert_eq!(complete(&mut s, "ps-k"), "ps-kill");
        assert_eq!(complete(&mut s, "zzz"), "zzz");
    }

    #[test]
    fn cd_is_per_session() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let sh = shell();
        let mgr = SessionManager::new(dir.path().to_path_buf(), 10);
        let (_, a) = mgr.open();
        let (_, b) = mgr.open();

        let reply = line(&sh, &mut lock_session(&a), "cd sub");
        assert_eq!(reply.prompt, Some(Prompt::Shell(dir.path().join("sub"))));
        assert_eq!(lock_session(&a).cwd(), dir.path().join("sub"));
        assert_eq!(lock_session(&b).cwd(), dir.path());
        let reply = line(&sh, &mut lock_session(&b), "pwd");
        assert_eq!(output(&reply), dir.path().display().to_string());
    }

    #[test]
    fn edit_without_operand() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell();
        let mut s = session_in(dir.path());
        assert_eq!(output(&line(&sh, &mut s, "edit")), "edit: missing filename");
        assert!(s.is_idle());
    }

    #[test]
    fn vocabulary_includes_builtins() {
        let sh = shell();
        let words = Shell::vocabulary(sh.registry());
        for w in ["cat", "sort", "uniq", "help", "ls"] {
            assert!(words.iter().any(|x| x == w), "{w}");
        }
        assert!(words.windows(2).all(|p| p[0] < p[1]));
    }
}
