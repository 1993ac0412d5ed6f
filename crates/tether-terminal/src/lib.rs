//! Command engine and session state machines.
//!
//! The engine is a registry-based dispatch system. Registry commands
//! implement the `Command` trait and return their output as values. The
//! compiler splits a raw line on sequencing operators, redirection and
//! pipes, expands globs, and drives the pipeline executor. Each client
//! session is either idle, editing a file, or capturing lines for a write;
//! the `Shell` routes every input to the right state machine.

mod commands;
pub mod compiler;
pub mod editor;
mod file_commands;
pub mod glob;
mod interpreter;
pub mod parser;
pub mod pipeline;
pub mod process;
mod process_commands;
pub mod session;
pub mod shell;
pub mod translate;
pub mod writer;

/// Register all shipped registry commands (fs, process, shell) into a registry.
pub use commands::register_builtins;
/// A single executable registry command.
pub use interpreter::Command;
/// Output produced by a registry command (text, table, signals).
pub use interpreter::CommandOutput;
/// Table of registry commands keyed by name.
pub use interpreter::CommandRegistry;
/// Per-invocation environment passed to every registry command.
pub use interpreter::Environment;
/// Session transition requested by a command.
pub use interpreter::Signal;
/// Resolve a user-supplied path against a working directory.
pub use interpreter::resolve_path;
/// Split a command segment into words, honoring quotes.
pub use interpreter::tokenize;
pub use session::{Mode, Session, SessionHandle, SessionId, SessionManager, lock_session};
pub use shell::{Input, Prompt, Reply, Shell};
pub use writer::WriteMode;
