use super::DaemonError;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

#[cfg(windows)]
use windows_sys::Win32::Foundation::CloseHandle;
#[cfg(windows)]
use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
#[cfg(windows)]
use windows_sys::Win32::System::Threading::{
    CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS, GetExitCodeProcess, OpenProcess,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE, TerminateProcess,
};

#[cfg(windows)]
const STILL_ACTIVE: u32 = 259;
#[cfg(windows)]
const ERROR_ACCESS_DENIED: i32 = 5;

/// How to re-launch this executable as a detached background instance.
#[derive(Debug, Clone)]
pub struct Launcher {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Receives the child's stdout and stderr.
    pub log_path: PathBuf,
}

/// Starts the process in its own session (POSIX) or process group (Windows).
///
/// The returned `Child` is never waited on by the CLI; it outlives it.
pub fn spawn_detached(launcher: &Launcher) -> Result<Child, DaemonError> {
    if let Some(parent) = launcher.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&launcher.log_path)?;

    let mut cmd = Command::new(&launcher.program);
    cmd.args(&launcher.args)
        .envs(launcher.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
    }

    let child = cmd.spawn()?;
    tracing::debug!(pid = child.id(), "Spawned detached process");
    Ok(child)
}

/// Writes `pid` in decimal unless the file already exists, in which case
/// nothing is written and `false` is returned.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<bool, DaemonError> {
    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    file.write_all(pid.to_string().as_bytes())?;
    Ok(true)
}

/// Reads a decimal pid. Missing or unparsable files read as `None`.
pub fn read_pid_file(path: &Path) -> Result<Option<i32>, DaemonError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(content.trim().parse().ok())
}

/// Whether `pid` names a live process. Errors other than "no such process"
/// count as alive.
#[cfg(unix)]
pub fn is_running(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(windows)]
pub fn is_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid as u32);
        if handle.is_null() {
            return std::io::Error::last_os_error().raw_os_error() == Some(ERROR_ACCESS_DENIED);
        }
        let mut code: u32 = 0;
        let ok = GetExitCodeProcess(handle, &mut code);
        CloseHandle(handle);
        ok == 0 || code == STILL_ACTIVE
    }
}

/// Asks the process to shut down gracefully.
#[cfg(unix)]
pub fn interrupt(pid: i32) -> Result<(), DaemonError> {
    send_signal(pid, nix::sys::signal::Signal::SIGINT)
}

/// Terminates the process unconditionally.
#[cfg(unix)]
pub fn kill(pid: i32) -> Result<(), DaemonError> {
    send_signal(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn send_signal(pid: i32, signal: nix::sys::signal::Signal) -> Result<(), DaemonError> {
    use nix::unistd::Pid;

    if pid <= 0 {
        return Err(DaemonError::Signal {
            pid,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        });
    }
    nix::sys::signal::kill(Pid::from_raw(pid), signal).map_err(|errno| DaemonError::Signal {
        pid,
        source: std::io::Error::from(errno),
    })
}

#[cfg(windows)]
pub fn interrupt(pid: i32) -> Result<(), DaemonError> {
    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid as u32) };
    if ok == 0 {
        return Err(DaemonError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(windows)]
pub fn kill(pid: i32) -> Result<(), DaemonError> {
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid as u32);
        if handle.is_null() {
            return Err(DaemonError::Signal {
                pid,
                source: std::io::Error::last_os_error(),
            });
        }
        let ok = TerminateProcess(handle, 1);
        let source = std::io::Error::last_os_error();
        CloseHandle(handle);
        if ok == 0 {
            return Err(DaemonError::Signal { pid, source });
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pid_file_reads_decimal_pid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("web.pid");
        assert_eq!(read_pid_file(&path).unwrap(), None);

        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Some(4242));

        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), None);
    }

    #[test]
    fn pid_file_is_never_overwritten() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("web.pid");
        assert!(write_pid_file(&path, 17).unwrap());
        assert!(!write_pid_file(&path, 18).unwrap());
        assert_eq!(read_pid_file(&path).unwrap(), Some(17));
    }

    #[test]
    fn liveness_tracks_a_real_child() {
        assert!(is_running(std::process::id() as i32));
        assert!(!is_running(0));
        assert!(!is_running(-5));

        let temp = TempDir::new().unwrap();
        let launcher = Launcher {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            env: Vec::new(),
            log_path: temp.path().join("out.log"),
        };
        let mut child = spawn_detached(&launcher).unwrap();
        let pid = child.id() as i32;
        assert!(is_running(pid));

        kill(pid).unwrap();
        child.wait().unwrap();
        assert!(!is_running(pid));
    }
}
