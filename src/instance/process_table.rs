use super::ProcessTable;

/// Checks processes with the operating system.
///
/// A process is an instance if it is alive (it can receive signals) and its
/// command line mentions the program. A reused pid of an unrelated process or
/// a zombie (without command line) is not an instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsProcessTable;

impl ProcessTable for OsProcessTable {
    #[cfg(unix)]
    fn is_process_alive(&self, pid: u32, identity: &str) -> bool {
        is_running(pid)
            && command_line(pid)
                .map(|command_line| command_line.contains(identity))
                .unwrap_or(false)
    }

    /// There is no process introspection here, every lock is assumed to be held.
    #[cfg(not(unix))]
    fn is_process_alive(&self, _pid: u32, _identity: &str) -> bool {
        true
    }
}

#[cfg(unix)]
fn is_running(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    // 0 and negative pids would address process groups
    let pid = match i32::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        _ => return false,
    };

    // Signal 0 only checks if the process exists, EPERM means it exists but isn't ours
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(target_os = "linux")]
fn command_line(pid: u32) -> Option<String> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let args: Vec<_> = raw
        .split(|byte| *byte == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect();

    if args.is_empty() {
        None
    } else {
        Some(args.join(" "))
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn command_line(pid: u32) -> Option<String> {
    duct::cmd!("ps", "-o", "command=", "-p", pid.to_string())
        .stderr_null()
        .read()
        .ok()
        .filter(|command_line| !command_line.is_empty())
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::instance::program_identity;
    use duct::cmd;
    use std::{error::Error, process};

    #[test]
    fn it_should_find_the_current_process() {
        assert!(OsProcessTable.is_process_alive(process::id(), &program_identity()));
    }

    #[test]
    fn it_should_not_match_an_unrelated_program() {
        assert!(!OsProcessTable.is_process_alive(process::id(), "surely-not-this-program"));
    }

    #[test]
    fn it_should_not_find_a_finished_process() -> Result<(), Box<dyn Error>> {
        let handle = cmd!("true").start()?;
        let pid = handle.pids()[0];
        handle.wait()?;

        assert!(!OsProcessTable.is_process_alive(pid, "true"));

        Ok(())
    }

    #[test]
    fn it_should_not_address_process_groups() {
        assert!(!OsProcessTable.is_process_alive(0, ""));
        assert!(!OsProcessTable.is_process_alive(u32::MAX, ""));
    }
}
