//! C5: elevation prober. Forks a child that drops to the target user and
//! runs the host's `sudo`-like tool in validate-only mode, feeding the
//! just-verified password on its stdin. Bounded by a configurable timeout;
//! never distinguishes "no password required" from any other success, and
//! never surfaces prober error categories to the caller — any non-zero
//! result collapses to "unprivileged".

use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};

use crate::consts::SUDO_PATH;
use crate::privilege::{drop_to_user, TargetUser};
use crate::secret::LockedSecret;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Probes whether `user` may elevate to root using `secret`. Never returns
/// an error for "probe said no" — only for broker-internal plumbing
/// failures (fork/pipe/exec setup). The boolean result is the sole signal
/// the caller receives.
pub fn probe(user: &TargetUser, secret: &LockedSecret, timeout: Duration) -> Result<bool, ElevationError> {
    let (read_end, write_end) = pipe()?;

    match unsafe { fork()? } {
        ForkResult::Parent { child } => {
            drop(read_end);
            feed_password(write_end, secret);
            let ok = wait_bounded(child, timeout)?;
            if ok {
                drop_ticket(user);
            }
            Ok(ok)
        }
        ForkResult::Child => {
            drop(write_end);
            run_probe_child(user, read_end);
        }
    }
}

fn feed_password(write_end: OwnedFd, secret: &LockedSecret) {
    use std::fs::File;
    let mut f = File::from(write_end);
    // best-effort: if the child already exited (e.g. exec failed) this
    // write may fail with EPIPE, which is not itself a probe failure.
    let _ = f.write_all(secret.as_bytes());
    let _ = f.write_all(b"\n");
}

fn wait_bounded(child: Pid, timeout: Duration) -> Result<bool, ElevationError> {
    let deadline = Instant::now() + timeout;
    loop {
        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    let _ = nix::sys::signal::kill(child, nix::sys::signal::Signal::SIGKILL);
                    let _ = waitpid(child, None);
                    return Ok(false);
                }
                std::thread::sleep(POLL_INTERVAL.min(deadline - Instant::now()));
            }
            Ok(WaitStatus::Exited(_, code)) => return Ok(code == 0),
            Ok(_) => return Ok(false),
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Drops any cached elevation ticket. Only called after a successful probe.
/// Best-effort: its exit status is never allowed to flip the probe result.
fn drop_ticket(user: &TargetUser) {
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            let _ = waitpid(child, None);
        }
        Ok(ForkResult::Child) => {
            if drop_to_user(user).is_err() {
                std::process::exit(1);
            }
            let argv = [c"sudo", c"-k"];
            let envp: [&std::ffi::CStr; 0] = [];
            let _ = nix::unistd::execve(c"/usr/bin/sudo", &argv, &envp);
            std::process::exit(1);
        }
        Err(_) => {}
    }
}

fn run_probe_child(user: &TargetUser, stdin_read: OwnedFd) -> ! {
    if drop_to_user(user).is_err() {
        std::process::exit(1);
    }

    if nix::unistd::dup2_stdin(&stdin_read).is_err() {
        std::process::exit(1);
    }
    drop(stdin_read);

    std::env::remove_var("SUDO_ASKPASS");
    for (key, _) in std::env::vars() {
        std::env::remove_var(key);
    }
    std::env::set_var("PATH", crate::consts::MINIMAL_PATH);

    let path = std::ffi::CString::new(SUDO_PATH).unwrap_or_default();
    let arg_sudo = std::ffi::CString::new(SUDO_PATH).unwrap_or_default();
    let arg_s = c"-S";
    let arg_p = c"-p";
    let arg_prompt = c"";
    let arg_v = c"-v";
    let argv = [
        arg_sudo.as_c_str(),
        arg_s,
        arg_p,
        arg_prompt,
        arg_v,
    ];
    let path_var = std::ffi::CString::new(format!("PATH={}", crate::consts::MINIMAL_PATH))
        .unwrap_or_default();
    let envp = [path_var.as_c_str()];

    let _ = nix::unistd::execve(&path, &argv, &envp);
    std::process::exit(127);
}
