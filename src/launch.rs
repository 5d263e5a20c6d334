//! C8: process launcher. The heart of the broker — builds the fixed FD
//! layout, sanitises the environment, applies resource limits, execs the
//! bridge through its retained handle, and confirms the exec over a
//! close-on-exec status pipe before the broker emits a response.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::fcntl::{fcntl, readlink, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::resource::{setrlimit, Resource};
use nix::unistd::{chdir, close, fork, pipe, pipe2, write, ForkResult, Gid, Pid, Uid};

use crate::binaryval::BridgeHandle;
use crate::consts::*;
use crate::privilege::{drop_to_user, rise_to_root, TargetUser};
use crate::validate::{valid_locale, valid_term};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("bridge exec failed")]
    ExecFailed,
    #[error("bridge start timeout")]
    Timeout,
}

pub enum Identity {
    Root,
    User(TargetUser),
}

pub struct LaunchRequest {
    pub identity: Identity,
    pub bridge: BridgeHandle,
    pub client_conn: RawFd,
    pub bootstrap: Vec<u8>,
    pub rlimit_nproc: u64,
    pub exec_timeout: Duration,
}

pub struct LaunchedBridge {
    pub pid: Pid,
}

/// Runs C8 to completion: fork, build the FD plan in the child, exec the
/// bridge, and block in the parent until exec is confirmed (EOF) or the
/// timeout elapses.
pub fn launch(req: LaunchRequest) -> Result<LaunchedBridge, LaunchError> {
    let (bootstrap_read, bootstrap_write) = pipe()?;
    let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC)?;

    match unsafe { fork()? } {
        ForkResult::Parent { child } => {
            drop(bootstrap_read);
            write_bootstrap(bootstrap_write, &req.bootstrap);
            drop(status_write);
            confirm_exec(status_read, req.exec_timeout)?;
            Ok(LaunchedBridge { pid: child })
        }
        ForkResult::Child => {
            drop(bootstrap_write);
            run_child(
                req.identity,
                req.bridge,
                req.client_conn,
                bootstrap_read,
                status_write,
                req.rlimit_nproc,
            );
        }
    }
}

fn write_bootstrap(write_end: OwnedFd, bootstrap: &[u8]) {
    use std::io::Write as _;
    let mut f = std::fs::File::from(write_end);
    let _ = f.write_all(bootstrap);
}

fn confirm_exec(status_read: OwnedFd, timeout: Duration) -> Result<(), LaunchError> {
    let mut pollfds = [PollFd::new(status_read.as_fd_ref(), PollFlags::POLLIN)];
    let timeout_ms: i32 = timeout.as_millis().min(i32::MAX as u128) as i32;
    let n = poll(&mut pollfds, PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::NONE))?;
    if n == 0 {
        return Err(LaunchError::Timeout);
    }

    let mut byte = [0u8; 1];
    let read_n = nix::unistd::read(status_read.as_raw_fd(), &mut byte)?;
    if read_n == 0 {
        Ok(())
    } else {
        Err(LaunchError::ExecFailed)
    }
}

/// Never returns: either execs the bridge or exits with a nonzero status.
fn run_child(
    identity: Identity,
    bridge: BridgeHandle,
    client_conn: RawFd,
    bootstrap_read: OwnedFd,
    status_write: OwnedFd,
    rlimit_nproc: u64,
) -> ! {
    let privileged = matches!(identity, Identity::Root);

    match identity {
        Identity::Root => {
            if rise_to_root().is_err() {
                std::process::exit(EXIT_PRIVILEGE_DROP_FAILED);
            }
        }
        Identity::User(ref user) => {
            if drop_to_user(user).is_err() {
                std::process::exit(EXIT_PRIVILEGE_DROP_FAILED);
            }
        }
    }

    apply_resource_limits(rlimit_nproc);

    let home = match &identity {
        Identity::Root => "/root".to_string(),
        Identity::User(user) => user.home.to_string_lossy().into_owned(),
    };
    if let Identity::User(_) = &identity {
        if chdir(home.as_str()).is_err() {
            std::process::exit(EXIT_PRIVILEGE_DROP_FAILED);
        }
    }

    let env = build_environment(&identity, &home);

    if apply_fd_plan(client_conn, bootstrap_read.as_raw_fd(), status_write.as_raw_fd(), bridge.as_raw_fd()).is_err() {
        report_exec_failure(4);
        std::process::exit(1);
    }

    let _ = privileged;

    exec_bridge(&env);
}

fn apply_resource_limits(rlimit_nproc: u64) {
    let _ = setrlimit(Resource::RLIMIT_CPU, BRIDGE_RLIMIT_CPU_SECS, BRIDGE_RLIMIT_CPU_SECS);
    let _ = setrlimit(Resource::RLIMIT_NOFILE, BRIDGE_RLIMIT_NOFILE, BRIDGE_RLIMIT_NOFILE);
    let _ = setrlimit(Resource::RLIMIT_NPROC, rlimit_nproc, rlimit_nproc);
    let _ = setrlimit(Resource::RLIMIT_AS, BRIDGE_RLIMIT_AS_BYTES, BRIDGE_RLIMIT_AS_BYTES);
}

fn build_environment(identity: &Identity, home: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), MINIMAL_PATH.to_string());

    let lang = std::env::var("LANG")
        .ok()
        .filter(|v| valid_locale(v))
        .unwrap_or_else(|| DEFAULT_LANG.to_string());
    env.insert("LANG".to_string(), lang.clone());
    env.insert("LC_ALL".to_string(), lang);

    let term = std::env::var("TERM")
        .ok()
        .filter(|v| valid_term(v))
        .unwrap_or_else(|| DEFAULT_TERM.to_string());
    env.insert("TERM".to_string(), term);

    env.insert("HOME".to_string(), home.to_string());

    let (user, logname) = match identity {
        Identity::Root => ("root".to_string(), "root".to_string()),
        Identity::User(u) => (u.name.clone(), u.name.clone()),
    };
    env.insert("USER".to_string(), user.clone());
    env.insert("LOGNAME".to_string(), logname);

    if let Identity::User(u) = identity {
        env.insert(
            "XDG_RUNTIME_DIR".to_string(),
            format!("/run/user/{}", u.uid.as_raw()),
        );
    }

    if let Ok(journal_stream) = std::env::var("JOURNAL_STREAM") {
        env.insert("JOURNAL_STREAM".to_string(), journal_stream);
    }

    env
}

/// Moves any source FD that collides with a destination slot out of the
/// way first, then `dup2`s each source into its final slot, re-asserting
/// close-on-exec on FD 4 afterward since `dup2` does not carry it across.
fn apply_fd_plan(
    client_conn: RawFd,
    bootstrap_read: RawFd,
    status_write: RawFd,
    bridge: RawFd,
) -> Result<(), nix::Error> {
    struct Slot {
        source: RawFd,
        dest: RawFd,
        cloexec: bool,
    }

    let plan = [
        Slot { source: bootstrap_read, dest: 0, cloexec: false },
        Slot { source: 2, dest: 1, cloexec: false },
        Slot { source: client_conn, dest: 3, cloexec: false },
        Slot { source: status_write, dest: 4, cloexec: true },
        Slot { source: bridge, dest: 5, cloexec: true },
    ];

    // Park any source that collides with a not-yet-filled destination at a
    // high, uncontended fd before moving anything into place.
    let mut parked: Vec<(RawFd, RawFd)> = Vec::new();
    let dests: Vec<RawFd> = plan.iter().map(|s| s.dest).collect();
    let mut sources: Vec<RawFd> = plan.iter().map(|s| s.source).collect();

    for i in 0..sources.len() {
        if dests.contains(&sources[i]) && sources[i] != plan[i].dest {
            let high = fcntl(
                unsafe { BorrowedFd::borrow_raw(sources[i]) },
                FcntlArg::F_DUPFD_CLOEXEC(64),
            )?;
            parked.push((sources[i], high));
            sources[i] = high;
        }
    }

    for (i, slot) in plan.iter().enumerate() {
        let src = sources[i];
        if src != slot.dest {
            raw_dup2(src, slot.dest)?;
        }
        if slot.cloexec {
            fcntl(
                unsafe { BorrowedFd::borrow_raw(slot.dest) },
                FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC),
            )?;
        } else {
            fcntl(
                unsafe { BorrowedFd::borrow_raw(slot.dest) },
                FcntlArg::F_SETFD(FdFlag::empty()),
            )?;
        }
    }

    for (original, parked_fd) in parked {
        if !dests.contains(&original) {
            let _ = close(original);
        }
        let _ = close(parked_fd);
    }

    // Close everything else.
    if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
        for entry in entries.flatten() {
            if let Ok(fd) = entry.file_name().to_string_lossy().parse::<RawFd>() {
                if fd > 5 {
                    let _ = close(fd);
                }
            }
        }
    }

    Ok(())
}

fn exec_bridge(env: &BTreeMap<String, String>) -> ! {
    let argv0 = CString::new(BRIDGE_ARGV0).expect("constant contains no NUL");
    let argv = [argv0.as_c_str()];
    let envp: Vec<CString> = env
        .iter()
        .map(|(k, v)| CString::new(format!("{k}={v}")).expect("env values contain no NUL"))
        .collect();
    let envp_refs: Vec<&std::ffi::CStr> = envp.iter().map(|c| c.as_c_str()).collect();

    // FD 5 holds the validated bridge handle; mark it close-on-exec right
    // before the attempt so a successful exec closes it automatically.
    let _ = fcntl(5, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));

    let exec_result = unsafe {
        libc::syscall(
            libc::SYS_execveat,
            5,
            c"".as_ptr(),
            argv.as_ptr() as *const *const libc::c_char,
            envp_refs.as_ptr() as *const *const libc::c_char,
            libc::AT_EMPTY_PATH,
        )
    };

    if exec_result == -1 {
        // Fallback: resolve the handle's real target via the procfs fd
        // symlink *before* closing it, since closing fd 5 first would make
        // that symlink dangle and the fallback could never succeed.
        let resolved = readlink("/proc/self/fd/5").ok();
        let _ = close(5);
        if let Some(path) = resolved {
            if let Ok(path) = CString::new(path.as_os_str().as_encoded_bytes()) {
                let _ = nix::unistd::execve(&path, &argv, &envp_refs);
            }
        }
    }

    report_exec_failure(4);
    std::process::exit(127);
}

fn raw_dup2(oldfd: RawFd, newfd: RawFd) -> Result<(), nix::Error> {
    let res = unsafe { libc::dup2(oldfd, newfd) };
    nix::errno::Errno::result(res).map(drop)
}

fn report_exec_failure(status_fd: RawFd) {
    let _ = write(unsafe { std::os::fd::BorrowedFd::borrow_raw(status_fd) }, &[1u8]);
}

trait AsFdRef {
    fn as_fd_ref(&self) -> std::os::fd::BorrowedFd<'_>;
}
impl AsFdRef for OwnedFd {
    fn as_fd_ref(&self) -> std::os::fd::BorrowedFd<'_> {
        use std::os::fd::AsFd;
        self.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_excludes_unlisted_variables_unprivileged() {
        let user = TargetUser {
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
            name: "alice".to_string(),
            home: std::path::PathBuf::from("/home/alice"),
        };
        let env = build_environment(&Identity::User(user), "/home/alice");
        assert_eq!(env.get("PATH").unwrap(), MINIMAL_PATH);
        assert_eq!(env.get("HOME").unwrap(), "/home/alice");
        assert_eq!(env.get("USER").unwrap(), "alice");
        assert_eq!(env.get("LOGNAME").unwrap(), "alice");
        assert_eq!(env.get("XDG_RUNTIME_DIR").unwrap(), "/run/user/1000");
    }

    #[test]
    fn environment_uses_root_home_when_privileged() {
        let env = build_environment(&Identity::Root, "/root");
        assert_eq!(env.get("HOME").unwrap(), "/root");
        assert_eq!(env.get("USER").unwrap(), "root");
        assert!(!env.contains_key("XDG_RUNTIME_DIR"));
    }
}
