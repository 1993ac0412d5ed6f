//! Built-in registry commands and registration of the full command set.

use std::time::Duration;

use tether_types::error::{Result, TetherError};

use crate::file_commands::register_file_commands;
use crate::interpreter::{
    Command, CommandOutput, CommandRegistry, Environment, Signal, resolve_path,
};
use crate::process::{host_shell_argv, run_process};
use crate::process_commands::register_process_commands;
use crate::writer::parse_write_args;

/// Register every registry command. `process_timeout` bounds `shell`.
pub fn register_builtins(reg: &mut CommandRegistry, process_timeout: Option<Duration>) {
    reg.register(Box::new(EchoCmd));
    reg.register(Box::new(HistoryCmd));
    reg.register(Box::new(ShellCmd {
        timeout: process_timeout,
    }));
    reg.register(Box::new(EditCmd));
    reg.register(Box::new(WriteCmd));
    reg.register(Box::new(ExitCmd { name: "exit" }));
    reg.register(Box::new(ExitCmd { name: "quit" }));
    register_file_commands(reg);
    register_process_commands(reg);
}

// ---------------------------------------------------------------------------
// echo
// ---------------------------------------------------------------------------

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

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

struct HistoryCmd;
impl Command for HistoryCmd {
    fn name(&self) -> &str {
        "history"
    }
    fn description(&self) -> &str {
        "Show this session's command history"
    }
    fn usage(&self) -> &str {
        "history"
    }
    fn execute(&self, _args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        if env.history.is_empty() {
            return Ok(CommandOutput::Text("No history found.".to_string()));
        }
        let lines: Vec<String> = env
            .history
            .iter()
            .enumerate()
            .map(|(i, cmd)| format!("{:>5}  {cmd}", i + 1))
            .collect();
        Ok(CommandOutput::Text(lines.join("\n")))
    }
}

// ---------------------------------------------------------------------------
// shell
// ---------------------------------------------------------------------------

struct ShellCmd {
    timeout: Option<Duration>,
}

impl Command for ShellCmd {
    fn name(&self) -> &str {
        "shell"
    }
    fn description(&self) -> &str {
        "Run a command line in the host shell"
    }
    fn usage(&self) -> &str {
        "shell <command line>"
    }
    fn category(&self) -> &str {
        "process"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        if args.is_empty() {
            return Err(TetherError::Command("shell: missing command".to_string()));
        }
        let line = args.join(" ");
        let output = run_process(&host_shell_argv(&line), &env.cwd, None, self.timeout)?;
        if output.timed_out() {
            return Err(TetherError::Process(format!(
                "shell: killed after {}s",
                self.timeout.map_or(0, |t| t.as_secs())
            )));
        }
        let text = if output.success() {
            output.stdout
        } else {
            output.stderr
        };
        let text = text.trim_end();
        if text.is_empty() {
            Ok(CommandOutput::None)
        } else {
            Ok(CommandOutput::Text(text.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// edit / write / exit
// ---------------------------------------------------------------------------

struct EditCmd;
impl Command for EditCmd {
    fn name(&self) -> &str {
        "edit"
    }
    fn description(&self) -> &str {
        "Open a file in the line editor"
    }
    fn usage(&self) -> &str {
        "edit <file>"
    }
    fn category(&self) -> &str {
        "editing"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        let Some(&file) = args.first() else {
            return Err(TetherError::Command("edit: missing filename".to_string()));
        };
        Ok(CommandOutput::Signal(Signal::Edit {
            path: resolve_path(&env.cwd, file),
        }))
    }
}

struct WriteCmd;
impl Command for WriteCmd {
    fn name(&self) -> &str {
        "write"
    }
    fn description(&self) -> &str {
        "Capture lines into a file until a lone '.'; -a appends"
    }
    fn usage(&self) -> &str {
        "write [-a] <file>"
    }
    fn category(&self) -> &str {
        "editing"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        let (mode, file) = parse_write_args(args)?;
        Ok(CommandOutput::Signal(Signal::Write {
            path: resolve_path(&env.cwd, file),
            mode,
        }))
    }
}

struct ExitCmd {
    name: &'static str,
}

impl Command for ExitCmd {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Close the session"
    }
    fn usage(&self) -> &str {
        self.name
    }
    fn execute(&self, _args: &[&str], _env: &mut Environment<'_>) -> Result<CommandOutput> {
        Ok(CommandOutput::Signal(Signal::Exit))
    }
}
