//! Process-table and host status commands: ps, ps-list, ps-kill, ps-filter,
//! sysinfo.

use std::thread;

use chrono::Local;
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, Pid, ProcessesToUpdate, Signal, System};
use tether_types::error::{Result, TetherError};

use crate::interpreter::{Command, CommandOutput, Environment};

/// Snapshot the process table. With `sample_cpu`, refresh twice so the
/// CPU percentages reflect a real interval.
fn snapshot(sample_cpu: bool) -> System {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    if sample_cpu {
        thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_processes(ProcessesToUpdate::All, true);
    }
    sys
}

/// Rows of (pid, name, cpu%, mem%) sorted by pid.
fn process_rows(sys: &System, filter: Option<&str>) -> Vec<(Pid, String, f32, f64)> {
    let total = sys.total_memory().max(1) as f64;
    let needle = filter.map(str::to_lowercase);
    let mut rows: Vec<_> = sys
        .processes()
        .iter()
        .map(|(pid, process)| {
            let name = process.name().to_string_lossy().into_owned();
            let mem = process.memory() as f64 * 100.0 / total;
            (*pid, name, process.cpu_usage(), mem)
        })
        .filter(|(_, name, _, _)| {
            needle
                .as_deref()
                .is_none_or(|n| name.to_lowercase().contains(n))
        })
        .collect();
    rows.sort_by_key(|(pid, ..)| *pid);
    rows
}

/// Human-readable byte count, e.g. `3.2GB`.
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut n = bytes as f64;
    for unit in UNITS {
        if n < 1024.0 {
            return format!("{n:.1}{unit}");
        }
        n /= 1024.0;
    }
    format!("{n:.1}PB")
}

// ---------------------------------------------------------------------------
// ps / ps-list
// ---------------------------------------------------------------------------

struct PsCmd {
    name: &'static str,
}

impl Command for PsCmd {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "List processes with CPU and memory usage"
    }
    fn usage(&self) -> &str {
        self.name
    }
    fn category(&self) -> &str {
        "process"
    }
    fn execute(&self, _args: &[&str], _env: &mut Environment<'_>) -> Result<CommandOutput> {
        let sys = snapshot(true);
        let rows = process_rows(&sys, None)
            .into_iter()
            .map(|(pid, name, cpu, mem)| {
                vec![
                    pid.to_string(),
                    name,
                    format!("{cpu:.1}"),
                    format!("{mem:.1}"),
                ]
            })
            .collect();
        Ok(CommandOutput::Table {
            headers: vec!["PID".into(), "NAME".into(), "CPU%".into(), "MEM%".into()],
            rows,
        })
    }
}

// ---------------------------------------------------------------------------
// ps-filter
// ---------------------------------------------------------------------------

struct PsFilterCmd;
impl Command for PsFilterCmd {
    fn name(&self) -> &str {
        "ps-filter"
    }
    fn description(&self) -> &str {
        "List processes whose name contains a substring (any case)"
    }
    fn usage(&self) -> &str {
        "ps-filter <name>"
    }
    fn category(&self) -> &str {
        "process"
    }
    fn execute(&self, args: &[&str], _env: &mut Environment<'_>) -> Result<CommandOutput> {
        let Some(&needle) = args.first() else {
            return Err(TetherError::Command(
                "ps-filter: missing process name".to_string(),
            ));
        };
        let sys = snapshot(false);
        let rows = process_rows(&sys, Some(needle))
            .into_iter()
            .map(|(pid, name, ..)| vec![pid.to_string(), name])
            .collect();
        Ok(CommandOutput::Table {
            headers: vec!["PID".into(), "NAME".into()],
            rows,
        })
    }
}

// ---------------------------------------------------------------------------
// ps-kill
// ---------------------------------------------------------------------------

struct PsKillCmd;
impl Command for PsKillCmd {
    fn name(&self) -> &str {
        "ps-kill"
    }
    fn description(&self) -> &str {
        "Terminate a process by PID"
    }
    fn usage(&self) -> &str {
        "ps-kill <pid>"
    }
    fn category(&self) -> &str {
        "process"
    }
    fn execute(&self, args: &[&str], _env: &mut Environment<'_>) -> Result<CommandOutput> {
        let Some(&raw) = args.first() else {
            return Err(TetherError::Command("ps-kill: missing pid".to_string()));
        };
        let pid: u32 = raw
            .parse()
            .map_err(|_| TetherError::Command(format!("ps-kill: invalid pid: {raw}")))?;
        let pid = Pid::from_u32(pid);

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let Some(process) = sys.process(pid) else {
            return Err(TetherError::Process(format!("ps-kill: no such process: {pid}")));
        };
        let sent = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());
        if !sent {
            return Err(TetherError::Process(format!(
                "ps-kill: could not signal process {pid}"
            )));
        }
        log::info!("terminated process {pid}");
        Ok(CommandOutput::Text(format!("Process {pid} terminated.")))
    }
}

// ---------------------------------------------------------------------------
// sysinfo
// ---------------------------------------------------------------------------

struct SysinfoCmd;
impl Command for SysinfoCmd {
    fn name(&self) -> &str {
        "sysinfo"
    }
    fn description(&self) -> &str {
        "Show time, CPU usage and memory usage"
    }
    fn usage(&self) -> &str {
        "sysinfo"
    }
    fn category(&self) -> &str {
        "process"
    }
    fn execute(&self, _args: &[&str], _env: &mut Environment<'_>) -> Result<CommandOutput> {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let total = sys.total_memory();
        let used = sys.used_memory();
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 * 100.0 / total as f64
        };
        Ok(CommandOutput::Text(format!(
            "Time: {}\nCPU Usage: {:.1}%\nMemory: {percent:.1}% used ({} / {})",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            sys.global_cpu_usage(),
            human_size(used),
            human_size(total)
        )))
    }
}

/// Register process and host status commands.
pub fn register_process_commands(reg: &mut crate::CommandRegistry) {
    reg.register(Box::new(PsCmd { name: "ps" }));
    reg.register(Box::new(PsCmd { name: "ps-list" }));
    reg.register(Box::new(PsFilterCmd));
    reg.register(Box::new(PsKillCmd));
    reg.register(Box::new(SysinfoCmd));
}
