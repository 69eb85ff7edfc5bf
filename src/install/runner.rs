//! Installer subprocess lifecycle
//!
//! The installer is started with exactly four arguments:
//!
//! ```text
//! argv[0]  installer path
//! argv[1]  RECOVERY_API_VERSION
//! argv[2]  control pipe write descriptor, as decimal
//! argv[3]  package path as given by the caller
//! ```

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::ptr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::{Mode, umask};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork, pipe2};

use super::reader::{PipeSource, ProtocolSource};
use crate::config::RECOVERY_API_VERSION;
use crate::error::InstallError;

/// Exit status the child reports when `execv` fails (`_exit(-1)`).
const EXEC_FAILED_STATUS: i32 = 255;

/// How the installer process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(i32),
}

impl ChildExit {
    pub fn success(self) -> bool {
        self == ChildExit::Exited(0)
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExit::Exited(code) => write!(f, "exited with status {code}"),
            ChildExit::Signaled(sig) => write!(f, "killed by signal {sig}"),
        }
    }
}

/// A running installer the orchestrator can wait on.
pub trait ChildHandle {
    /// Non-blocking check for termination.
    fn try_wait(&mut self) -> io::Result<Option<ChildExit>>;

    /// Block until the child terminates.
    fn wait(&mut self) -> io::Result<ChildExit>;
}

/// What to run.
#[derive(Debug, Clone)]
pub struct InstallerInvocation {
    pub program: PathBuf,
    pub package: String,
}

/// A started installer plus the read side of its control pipe.
pub struct LaunchedInstaller {
    pub child: Box<dyn ChildHandle>,
    pub source: Box<dyn ProtocolSource>,
}

pub trait InstallerLauncher {
    fn launch(&self, invocation: &InstallerInvocation) -> Result<LaunchedInstaller, InstallError>;
}

/// Starts the installer with `fork`/`execv` and a control pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForkLauncher;

impl InstallerLauncher for ForkLauncher {
    fn launch(&self, invocation: &InstallerInvocation) -> Result<LaunchedInstaller, InstallError> {
        let (child, read_end) = spawn_installer(invocation)?;
        Ok(LaunchedInstaller {
            child: Box::new(child),
            source: Box::new(PipeSource::new(File::from(read_end))),
        })
    }
}

fn cstring(bytes: &[u8], what: &str) -> Result<CString, InstallError> {
    CString::new(bytes).map_err(|_| InstallError::Spawn(format!("{what} contains a NUL byte")))
}

/// Program and null-terminated argv for `execv`, laid out ahead of time.
struct ExecArgs {
    program: CString,
    /// Owns the strings `argv` points into.
    _args: Vec<CString>,
    argv: Vec<*const libc::c_char>,
}

impl ExecArgs {
    fn new(program: CString, args: Vec<CString>) -> Self {
        let argv = args
            .iter()
            .map(|arg| arg.as_ptr())
            .chain([ptr::null()])
            .collect();
        Self {
            program,
            _args: args,
            argv,
        }
    }

    /// Replace the process image. Returns only on failure, with the cause.
    ///
    /// Allocation-free, so it may run in a child forked from a threaded
    /// process.
    fn exec(&self) -> Errno {
        // SAFETY: `program` and every `argv` entry point into C strings owned
        // by `self`, and `argv` ends with a null pointer.
        unsafe { libc::execv(self.program.as_ptr(), self.argv.as_ptr()) };
        Errno::last()
    }
}

/// Fork and exec the installer, returning the child and the pipe read end.
pub fn spawn_installer(invocation: &InstallerInvocation) -> Result<(ChildProcess, OwnedFd), InstallError> {
    // Both ends close on exec; only the child re-opens the write end for its
    // installer, so concurrent spawns never inherit each other's pipes.
    let (read_end, write_end) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| InstallError::Spawn(format!("pipe: {e}")))?;

    // Everything the child needs is prepared before fork.
    let program = cstring(invocation.program.as_os_str().as_bytes(), "installer path")?;
    let exec = ExecArgs::new(
        program.clone(),
        vec![
            program,
            cstring(RECOVERY_API_VERSION.to_string().as_bytes(), "api version")?,
            cstring(write_end.as_raw_fd().to_string().as_bytes(), "pipe fd")?,
            cstring(invocation.package.as_bytes(), "package path")?,
        ],
    );
    let exec_failed = format!("E:Can't run {} (", invocation.program.display());

    info!(
        "Fork installer: {} {} {} {}",
        invocation.program.display(),
        RECOVERY_API_VERSION,
        write_end.as_raw_fd(),
        invocation.package
    );

    // SAFETY: between fork and exec the child neither allocates nor takes
    // locks. It only makes the raw calls umask, close, fcntl, execv, write
    // and _exit on data prepared above.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            umask(Mode::from_bits_truncate(0o022));
            drop(read_end);
            clear_cloexec(write_end.as_raw_fd());
            let errno = exec.exec();
            report_exec_failure(&exec_failed, errno);
            // SAFETY: terminate the forked child without running the parent's
            // destructors or atexit handlers.
            unsafe { libc::_exit(EXEC_FAILED_STATUS) }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(write_end);
            debug!("installer running as pid {child}");
            Ok((ChildProcess::new(child), read_end))
        }
        Err(e) => Err(InstallError::Spawn(format!("fork: {e}"))),
    }
}

fn clear_cloexec(fd: RawFd) {
    // SAFETY: plain fcntl on a descriptor this process owns.
    unsafe {
        libc::fcntl(fd, libc::F_SETFD, 0);
    }
}

/// Raw writes to descriptor 1; `io::stdout()` may allocate its buffer.
fn report_exec_failure(prefix: &str, errno: Errno) {
    // SAFETY: stdout stays open for the life of the process.
    let stdout = unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) };
    for part in [prefix, errno.desc(), ")\n"] {
        let _ = nix::unistd::write(stdout, part.as_bytes());
    }
}

/// Forked installer process; reaped at most once.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    exit: Option<ChildExit>,
}

impl ChildProcess {
    fn new(pid: Pid) -> Self {
        Self { pid, exit: None }
    }

    fn reap(&mut self, flags: Option<WaitPidFlag>) -> io::Result<Option<ChildExit>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        let exit = match waitpid(self.pid, flags) {
            Ok(WaitStatus::Exited(_, code)) => Some(ChildExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => Some(ChildExit::Signaled(signal as i32)),
            Ok(_) => None,
            Err(Errno::EINTR) => None,
            Err(e) => return Err(io::Error::from(e)),
        };
        self.exit = exit;
        Ok(exit)
    }
}

impl ChildHandle for ChildProcess {
    fn try_wait(&mut self) -> io::Result<Option<ChildExit>> {
        self.reap(Some(WaitPidFlag::WNOHANG))
    }

    fn wait(&mut self) -> io::Result<ChildExit> {
        loop {
            if let Some(exit) = self.reap(None)? {
                return Ok(exit);
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            warn!("installer pid {} dropped before exit; waiting for it", self.pid);
            if let Err(e) = self.wait() {
                warn!("failed to reap installer pid {}: {e}", self.pid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_clean_exit_is_success() {
        assert!(ChildExit::Exited(0).success());
        assert!(!ChildExit::Exited(1).success());
        assert!(!ChildExit::Exited(EXEC_FAILED_STATUS).success());
        assert!(!ChildExit::Signaled(9).success());
    }

    #[test]
    fn exit_is_described_for_logs() {
        assert_eq!(ChildExit::Exited(7).to_string(), "exited with status 7");
        assert_eq!(ChildExit::Signaled(15).to_string(), "killed by signal 15");
    }

    #[test]
    fn nul_in_package_path_is_a_spawn_error() {
        let invocation = InstallerInvocation {
            program: PathBuf::from("/bin/true"),
            package: "bad\0path".to_string(),
        };
        let err = spawn_installer(&invocation).err().unwrap();
        assert!(matches!(err, InstallError::Spawn(_)));
    }

    #[test]
    fn exec_args_are_null_terminated() {
        let args = vec![
            CString::new("/bin/installer").unwrap(),
            CString::new("3").unwrap(),
            CString::new("9").unwrap(),
            CString::new("/cache/update.zip").unwrap(),
        ];
        let exec = ExecArgs::new(args[0].clone(), args.clone());

        assert_eq!(exec.argv.len(), 5);
        assert!(exec.argv[4].is_null());
        for (ptr, arg) in exec.argv.iter().zip(&args) {
            // SAFETY: the pointers are owned by `exec`, which is still alive.
            assert_eq!(unsafe { std::ffi::CStr::from_ptr(*ptr) }, arg.as_c_str());
        }
    }

    #[test]
    fn failed_exec_returns_the_cause() {
        let program = CString::new("/nonexistent/update-binary").unwrap();
        let exec = ExecArgs::new(program.clone(), vec![program]);
        assert_eq!(exec.exec(), Errno::ENOENT);
    }
}
