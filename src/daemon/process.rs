// Process control: liveness, detaching, output redirection, termination

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

/// Non-destructive liveness probe (`kill(pid, 0)`).
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    // Exists but owned by someone else
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Pid recorded in a lock file, if the file holds one.
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse().ok())
}

/// Make the spawned process a session leader before it execs, detaching it from
/// the controlling terminal.
pub fn detach_session(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Point stdout and stderr at `log_path` (appending).
pub fn redirect_output(log_path: &Path) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let fd = file.as_raw_fd();
    for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<bool> {
    if unsafe { libc::kill(pid as libc::pid_t, signal) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(err)
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    !is_process_alive(pid)
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Returns whether SIGKILL was needed.
pub fn terminate(pid: u32, grace: Duration) -> io::Result<bool> {
    if !send_signal(pid, libc::SIGTERM)? {
        return Ok(false);
    }
    if wait_for_exit(pid, grace) {
        return Ok(false);
    }

    log::warn!("[Daemon] Process {} ignored SIGTERM, sending SIGKILL", pid);
    if !send_signal(pid, libc::SIGKILL)? {
        return Ok(true);
    }
    if wait_for_exit(pid, Duration::from_secs(2)) {
        Ok(true)
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("process {} survived SIGKILL", pid),
        ))
    }
}
