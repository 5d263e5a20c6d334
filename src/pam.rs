//! C4: credential verifier. Wraps the host's PAM stack through `pam-sys`'s
//! raw bindings, mirroring the original implementation's direct use of
//! `pam_appl.h` (the higher-level `pam` crate bundles `setcred`/session
//! management in an order this broker cannot use: it needs `setcred`
//! established strictly before the elevation probe, with `open_session`
//! deferred until after the probe succeeds, which the coarser wrapper
//! does not expose).
//!
//! The conversation callback is split into two collaborators per the
//! re-architecture note: a secret supplier that only ever reads a borrowed
//! [`LockedSecret`], and a [`MotdCollector`] that only ever appends text.
//! Neither knows about the other.

use std::ffi::{c_void, CStr, CString};
use std::ptr;

use pam_sys::{PamConv, PamHandle, PamMessage, PamMessageStyle, PamResponse, PamReturnCode};

use crate::consts::PAM_SERVICE;
use crate::motd::MotdCollector;
use crate::secret::LockedSecret;

#[derive(Debug, thiserror::Error)]
pub enum PamVerifyError {
    #[error("password has expired; change it via SSH or console")]
    PasswordExpired,
    #[error("authentication failed")]
    AuthFailed,
    #[error("account is not permitted to authenticate")]
    AccountDenied,
    #[error("pam error: {0}")]
    Other(String),
}

pub struct VerifiedSession {
    handle: *mut PamHandle,
    session_open: bool,
    cred_established: bool,
}

/// Borrowed for the lifetime of the PAM conversation; never copied.
struct ConversationState<'a> {
    secret: &'a LockedSecret,
    motd: MotdCollector,
}

pub struct VerifyOutcome {
    pub session: VerifiedSession,
    pub motd: String,
}

/// Runs `pam_start` → `pam_authenticate` → `pam_acct_mgmt` →
/// `pam_setcred(ESTABLISH)`. `open_session` is deliberately **not** called
/// here; the caller defers it until after the elevation probe (§4.4).
pub fn verify(username: &str, secret: &LockedSecret) -> Result<VerifyOutcome, PamVerifyError> {
    let c_username =
        CString::new(username).map_err(|_| PamVerifyError::Other("bad username".into()))?;
    let c_service =
        CString::new(PAM_SERVICE).expect("PAM_SERVICE constant contains no interior NUL");

    let mut state = ConversationState {
        secret,
        motd: MotdCollector::new(),
    };

    let conv = PamConv {
        conv: Some(conversation_callback),
        data_ptr: &mut state as *mut ConversationState as *mut c_void,
    };

    let mut handle: *mut PamHandle = ptr::null_mut();
    let rc = unsafe {
        pam_sys::pam_start(
            c_service.as_ptr(),
            c_username.as_ptr(),
            &conv as *const PamConv,
            &mut handle as *mut *mut PamHandle,
        )
    };
    check(rc, "pam_start")?;

    let result = (|| -> Result<(), PamVerifyError> {
        let rc = unsafe { pam_sys::pam_authenticate(handle, 0) };
        map_authenticate_result(rc)?;

        let rc = unsafe { pam_sys::pam_acct_mgmt(handle, 0) };
        if rc == PamReturnCode::NEW_AUTHTOK_REQD as i32 {
            return Err(PamVerifyError::PasswordExpired);
        }
        if rc != PamReturnCode::SUCCESS as i32 {
            return Err(PamVerifyError::AccountDenied);
        }

        let rc = unsafe { pam_sys::pam_setcred(handle, pam_sys::PAM_ESTABLISH_CRED as i32) };
        check(rc, "pam_setcred(ESTABLISH)")?;

        Ok(())
    })();

    match result {
        Ok(()) => Ok(VerifyOutcome {
            session: VerifiedSession {
                handle,
                session_open: false,
                cred_established: true,
            },
            motd: state.motd.into_string(),
        }),
        Err(e) => {
            unsafe {
                pam_sys::pam_end(handle, PamReturnCode::AUTH_ERR as i32);
            }
            Err(e)
        }
    }
}

fn map_authenticate_result(rc: i32) -> Result<(), PamVerifyError> {
    if rc == PamReturnCode::SUCCESS as i32 {
        Ok(())
    } else if rc == PamReturnCode::NEW_AUTHTOK_REQD as i32 {
        Err(PamVerifyError::PasswordExpired)
    } else {
        Err(PamVerifyError::AuthFailed)
    }
}

fn check(rc: i32, what: &'static str) -> Result<(), PamVerifyError> {
    if rc == PamReturnCode::SUCCESS as i32 {
        Ok(())
    } else {
        Err(PamVerifyError::Other(format!("{what} failed (code {rc})")))
    }
}

impl VerifiedSession {
    /// Deferred until after the elevation probe, so a failed probe never
    /// leaves a session open.
    pub fn open_session(&mut self) -> Result<(), PamVerifyError> {
        let rc = unsafe { pam_sys::pam_open_session(self.handle, 0) };
        check(rc, "pam_open_session")?;
        self.session_open = true;
        Ok(())
    }
}

impl Drop for VerifiedSession {
    fn drop(&mut self) {
        if self.session_open {
            unsafe {
                pam_sys::pam_close_session(self.handle, 0);
            }
            self.session_open = false;
        }
        if self.cred_established {
            unsafe {
                pam_sys::pam_setcred(self.handle, pam_sys::PAM_DELETE_CRED as i32);
            }
            self.cred_established = false;
        }
        unsafe {
            pam_sys::pam_end(self.handle, PamReturnCode::SUCCESS as i32);
        }
    }
}

/// `pam_conv` callback. Supplies the secret on a silent password prompt and
/// forwards informational/error text to the bounded collector. Neither
/// collaborator is given access to the other's state.
extern "C" fn conversation_callback(
    num_msg: i32,
    msg: *mut *mut PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> i32 {
    if appdata_ptr.is_null() || msg.is_null() || resp.is_null() {
        return PamReturnCode::CONV_ERR as i32;
    }

    let state = unsafe { &mut *(appdata_ptr as *mut ConversationState) };
    let count = num_msg.max(0) as usize;

    let responses = unsafe { libc::calloc(count, std::mem::size_of::<PamResponse>()) };
    if responses.is_null() {
        return PamReturnCode::BUF_ERR as i32;
    }
    let responses = responses as *mut PamResponse;

    for i in 0..count {
        let message = unsafe { *msg.add(i) };
        if message.is_null() {
            continue;
        }
        let style = unsafe { (*message).msg_style };
        let text = unsafe {
            if (*message).msg.is_null() {
                None
            } else {
                CStr::from_ptr((*message).msg).to_str().ok()
            }
        };

        let response = unsafe { &mut *responses.add(i) };
        response.resp_retcode = 0;
        response.resp = ptr::null_mut();

        match style {
            s if s == PamMessageStyle::PROMPT_ECHO_OFF as i32 => {
                let secret_copy = unsafe {
                    libc::malloc(state.secret.len() + 1) as *mut libc::c_char
                };
                if secret_copy.is_null() {
                    continue;
                }
                unsafe {
                    ptr::copy_nonoverlapping(
                        state.secret.as_bytes().as_ptr(),
                        secret_copy as *mut u8,
                        state.secret.len(),
                    );
                    *secret_copy.add(state.secret.len()) = 0;
                }
                response.resp = secret_copy;
            }
            s if s == PamMessageStyle::TEXT_INFO as i32
                || s == PamMessageStyle::ERROR_MSG as i32 =>
            {
                if let Some(text) = text {
                    state.motd.push_line(text);
                }
            }
            _ => {}
        }
    }

    unsafe {
        *resp = responses;
    }
    PamReturnCode::SUCCESS as i32
}
