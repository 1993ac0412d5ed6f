//! Filesystem commands: pwd, cd, ls, ls-l, mkdir, rm, rmdir, touch, mv, cp.
//!
//! Every path operand is resolved against the calling session's working
//! directory. Commands taking several operands keep going past a failing
//! one and report all failures together.

use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tether_types::error::{Result, TetherError};

use crate::interpreter::{Command, CommandOutput, Environment, resolve_path};

/// Collects per-operand failures for multi-operand commands.
struct Failures {
    command: &'static str,
    lines: Vec<String>,
}

impl Failures {
    fn new(command: &'static str) -> Self {
        Self {
            command,
            lines: Vec::new(),
        }
    }

    fn push(&mut self, operand: &str, err: io::Error) {
        self.lines
            .push(format!("{}: {}", self.command, TetherError::resource(operand, err)));
    }

    fn push_msg(&mut self, msg: String) {
        self.lines.push(format!("{}: {msg}", self.command));
    }

    /// `Ok(None)` if nothing failed, else every failure as one error.
    fn finish(self) -> Result<CommandOutput> {
        if self.lines.is_empty() {
            Ok(CommandOutput::None)
        } else {
            Err(TetherError::Command(self.lines.join("\n")))
        }
    }
}

fn missing_operand(command: &str) -> TetherError {
    TetherError::Command(format!("{command}: missing operand"))
}

// ---------------------------------------------------------------------------
// pwd
// ---------------------------------------------------------------------------

struct PwdCmd;
impl Command for PwdCmd {
    fn name(&self) -> &str {
        "pwd"
    }
    fn description(&self) -> &str {
        "Print working directory"
    }
    fn usage(&self) -> &str {
        "pwd"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, _args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        Ok(CommandOutput::Text(env.cwd.display().to_string()))
    }
}

// ---------------------------------------------------------------------------
// cd
// ---------------------------------------------------------------------------

struct CdCmd;
impl Command for CdCmd {
    fn name(&self) -> &str {
        "cd"
    }
    fn description(&self) -> &str {
        "Change working directory"
    }
    fn usage(&self) -> &str {
        "cd [dir]"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        let operand = args.first().copied().unwrap_or("~");
        let target = resolve_path(&env.cwd, operand);
        let meta =
            fs::metadata(&target).map_err(|e| TetherError::resource(operand, e))?;
        if !meta.is_dir() {
            return Err(TetherError::Command(format!(
                "cd: {operand}: Not a directory"
            )));
        }
        env.cwd = target;
        Ok(CommandOutput::None)
    }
}

// ---------------------------------------------------------------------------
// ls
// ---------------------------------------------------------------------------

fn sorted_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

struct LsCmd;
impl Command for LsCmd {
    fn name(&self) -> &str {
        "ls"
    }
    fn description(&self) -> &str {
        "List directory contents"
    }
    fn usage(&self) -> &str {
        "ls [path]"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        let operand = args.first().copied().unwrap_or(".");
        let path = resolve_path(&env.cwd, operand);
        let names = sorted_names(&path).map_err(|e| TetherError::resource(operand, e))?;
        if names.is_empty() {
            return Ok(CommandOutput::None);
        }
        Ok(CommandOutput::Text(names.join("\n")))
    }
}

// ---------------------------------------------------------------------------
// ls-l
// ---------------------------------------------------------------------------

/// `ls -l` style permission string, e.g. `drwxr-xr-x`.
#[cfg(unix)]
fn mode_string(meta: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let kind = if meta.is_dir() {
        'd'
    } else if meta.file_type().is_symlink() {
        'l'
    } else {
        '-'
    };
    let mode = meta.permissions().mode();
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(not(unix))]
fn mode_string(meta: &Metadata) -> String {
    let kind = if meta.is_dir() { 'd' } else { '-' };
    let write = if meta.permissions().readonly() { '-' } else { 'w' };
    format!("{kind}r{write}-r{write}-r{write}-")
}

fn long_entry(name: &str, meta: &Metadata) -> String {
    let mtime = meta
        .modified()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| "????-??-?? ??:??".to_string());
    format!("{} {:>10} {mtime} {name}", mode_string(meta), meta.len())
}

struct LsLongCmd;
impl Command for LsLongCmd {
    fn name(&self) -> &str {
        "ls-l"
    }
    fn description(&self) -> &str {
        "Detailed listing with permissions, sizes and times"
    }
    fn usage(&self) -> &str {
        "ls-l [path]"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        let operand = args.first().copied().unwrap_or(".");
        let path = resolve_path(&env.cwd, operand);
        let meta = fs::metadata(&path).map_err(|e| TetherError::resource(operand, e))?;

        if !meta.is_dir() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| operand.to_string());
            return Ok(CommandOutput::Text(long_entry(&name, &meta)));
        }

        let names = sorted_names(&path).map_err(|e| TetherError::resource(operand, e))?;
        let mut lines = Vec::with_capacity(names.len());
        for name in names {
            // Entries describe the link itself, not its target.
            match fs::symlink_metadata(path.join(&name)) {
                Ok(meta) => lines.push(long_entry(&name, &meta)),
                // Entries removed mid-listing.
                Err(e) => lines.push(format!("ls-l: {name}: {e}")),
            }
        }
        if lines.is_empty() {
            return Ok(CommandOutput::None);
        }
        Ok(CommandOutput::Text(lines.join("\n")))
    }
}

// ---------------------------------------------------------------------------
// mkdir / rm / rmdir / touch
// ---------------------------------------------------------------------------

struct MkdirCmd;
impl Command for MkdirCmd {
    fn name(&self) -> &str {
        "mkdir"
    }
    fn description(&self) -> &str {
        "Create directories (with parents)"
    }
    fn usage(&self) -> &str {
        "mkdir <dir...>"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        if args.is_empty() {
            return Err(missing_operand("mkdir"));
        }
        let mut failures = Failures::new("mkdir");
        for &arg in args {
            let path = resolve_path(&env.cwd, arg);
            if path.exists() {
                failures.push(arg, io::Error::from(io::ErrorKind::AlreadyExists));
                continue;
            }
            if let Err(e) = fs::create_dir_all(&path) {
                failures.push(arg, e);
            }
        }
        failures.finish()
    }
}

struct RmCmd;
impl Command for RmCmd {
    fn name(&self) -> &str {
        "rm"
    }
    fn description(&self) -> &str {
        "Remove files or directories (recursively)"
    }
    fn usage(&self) -> &str {
        "rm <path...>"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        if args.is_empty() {
            return Err(missing_operand("rm"));
        }
        let mut failures = Failures::new("rm");
        for &arg in args {
            let path = resolve_path(&env.cwd, arg);
            let result = match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
                Ok(_) => fs::remove_file(&path),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                failures.push(arg, e);
            }
        }
        failures.finish()
    }
}

struct RmdirCmd;
impl Command for RmdirCmd {
    fn name(&self) -> &str {
        "rmdir"
    }
    fn description(&self) -> &str {
        "Remove empty directories"
    }
    fn usage(&self) -> &str {
        "rmdir <dir...>"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        if args.is_empty() {
            return Err(missing_operand("rmdir"));
        }
        let mut failures = Failures::new("rmdir");
        for &arg in args {
            if let Err(e) = fs::remove_dir(resolve_path(&env.cwd, arg)) {
                failures.push(arg, e);
            }
        }
        failures.finish()
    }
}

struct TouchCmd;
impl Command for TouchCmd {
    fn name(&self) -> &str {
        "touch"
    }
    fn description(&self) -> &str {
        "Create a file or update its timestamp"
    }
    fn usage(&self) -> &str {
        "touch <file...>"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        if args.is_empty() {
            return Err(TetherError::Command(
                "touch: missing file operand".to_string(),
            ));
        }
        let mut failures = Failures::new("touch");
        for &arg in args {
            let path = resolve_path(&env.cwd, arg);
            let result = File::options()
                .append(true)
                .create(true)
                .open(&path)
                .and_then(|file| file.set_modified(SystemTime::now()));
            if let Err(e) = result {
                failures.push(arg, e);
            }
        }
        failures.finish()
    }
}

// ---------------------------------------------------------------------------
// mv / cp
// ---------------------------------------------------------------------------

/// Split `src... dst` operands and resolve them.
fn sources_and_dest(
    command: &str,
    args: &[&str],
    cwd: &Path,
) -> Result<(Vec<(String, PathBuf)>, PathBuf)> {
    let Some((dest, sources)) = args.split_last() else {
        return Err(TetherError::Command(format!(
            "{command}: missing file operand"
        )));
    };
    if sources.is_empty() {
        return Err(TetherError::Command(format!(
            "{command}: missing destination file operand after '{dest}'"
        )));
    }
    let dest = resolve_path(cwd, dest);
    if sources.len() > 1 && !dest.is_dir() {
        return Err(TetherError::Command(format!(
            "{command}: target '{}' is not a directory",
            dest.display()
        )));
    }
    let sources = sources
        .iter()
        .map(|s| (s.to_string(), resolve_path(cwd, s)))
        .collect();
    Ok((sources, dest))
}

/// Where `src` lands: inside `dest` if that is a directory, else `dest` itself.
fn landing_path(src: &Path, dest: &Path) -> PathBuf {
    match (dest.is_dir(), src.file_name()) {
        (true, Some(name)) => dest.join(name),
        _ => dest.to_path_buf(),
    }
}

struct MvCmd;
impl Command for MvCmd {
    fn name(&self) -> &str {
        "mv"
    }
    fn description(&self) -> &str {
        "Move or rename files"
    }
    fn usage(&self) -> &str {
        "mv <src...> <dst>"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        let (sources, dest) = sources_and_dest("mv", args, &env.cwd)?;
        let mut failures = Failures::new("mv");
        for (operand, src) in sources {
            if let Err(e) = fs::rename(&src, landing_path(&src, &dest)) {
                failures.push(&operand, e);
            }
        }
        failures.finish()
    }
}

fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

struct CpCmd;
impl Command for CpCmd {
    fn name(&self) -> &str {
        "cp"
    }
    fn description(&self) -> &str {
        "Copy files (directories recursively)"
    }
    fn usage(&self) -> &str {
        "cp <src...> <dst>"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn execute(&self, args: &[&str], env: &mut Environment<'_>) -> Result<CommandOutput> {
        let (sources, dest) = sources_and_dest("cp", args, &env.cwd)?;
        let mut failures = Failures::new("cp");
        for (operand, src) in sources {
            let target = landing_path(&src, &dest);
            if src.is_dir() {
                if target.starts_with(&src) {
                    failures.push_msg(format!("cannot copy '{operand}' into itself"));
                    continue;
                }
                if let Err(e) = copy_tree(&src, &target) {
                    failures.push(&operand, e);
                }
            } else if let Err(e) = fs::copy(&src, &target) {
                failures.push(&operand, e);
            }
        }
        failures.finish()
    }
}

/// Register filesystem commands.
pub fn register_file_commands(reg: &mut crate::CommandRegistry) {
    reg.register(Box::new(PwdCmd));
    reg.register(Box::new(CdCmd));
    reg.register(Box::new(LsCmd));
    reg.register(Box::new(LsLongCmd));
    reg.register(Box::new(MkdirCmd));
    reg.register(Box::new(RmCmd));
    reg.register(Box::new(RmdirCmd));
    reg.register(Box::new(TouchCmd));
    reg.register(Box::new(MvCmd));
    reg.register(Box::new(CpCmd));
}
