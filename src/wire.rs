//! C1: wire codec. Parses the request header and length-prefixed fields off
//! the accepted connection, and emits the response header and field. All
//! multi-byte integers are big-endian; see the protocol tables for the
//! exact byte layout.

use std::io::{self, Read, Write};

use crate::consts::*;
use crate::secret::LockedSecret;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("short read")]
    ShortRead,
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    BadVersion(u8),
    #[error("field too large: declared {declared}, limit {limit}")]
    FieldTooLarge { declared: usize, limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A request decoded from the wire. `secret` is a [`LockedSecret`] from
/// construction; nothing else in this module ever holds an owned copy of
/// the password bytes.
pub struct Request {
    pub username: String,
    pub secret: LockedSecret,
    pub session_id: String,
    pub verbose: bool,
}

pub enum ResponseBody {
    Ok { motd: String, privileged: bool },
    Error { message: String },
}

/// Reads exactly one request frame from `r`. Reads the full frame before
/// any field is validated, so a malformed field never causes partial
/// processing of a later one.
pub fn read_request(r: &mut impl Read) -> Result<Request, WireError> {
    let mut header = [0u8; REQUEST_HEADER_LEN];
    read_exact_or_short(r, &mut header)?;

    if header[0..3] != MAGIC {
        return Err(WireError::BadMagic);
    }
    if header[3] != PROTO_VERSION {
        return Err(WireError::BadVersion(header[3]));
    }
    let verbose = header[4] & REQ_FLAG_VERBOSE != 0;

    let username_bytes = read_lenstr(r, MAX_USERNAME_LEN)?;
    let mut password_bytes = read_lenstr(r, MAX_PASSWORD_LEN)?;
    let session_id_bytes = read_lenstr(r, MAX_SESSION_ID_LEN)?;

    let secret = LockedSecret::new(&password_bytes);
    // The scratch buffer the password passed through is wiped immediately;
    // only the locked copy in `secret` survives.
    zero_scratch(&mut password_bytes);

    let username = String::from_utf8_lossy(&username_bytes).into_owned();
    let session_id = String::from_utf8_lossy(&session_id_bytes).into_owned();

    Ok(Request {
        username,
        secret,
        session_id,
        verbose,
    })
}

/// Writes exactly one response frame to `w`. Any short write is surfaced to
/// the caller as an error; this function never retries a partial write, so
/// the caller can treat any `Err` as "the peer may have an incomplete
/// frame, stop talking to it."
pub fn write_response(w: &mut impl Write, body: &ResponseBody) -> Result<(), WireError> {
    let mut header = [0u8; RESPONSE_HEADER_LEN];
    header[0..3].copy_from_slice(&MAGIC);
    header[3] = PROTO_VERSION;

    let payload: &str = match body {
        ResponseBody::Ok { motd, privileged } => {
            header[4] = RESP_STATUS_OK;
            header[5] = if *privileged {
                RESP_MODE_PRIVILEGED
            } else {
                RESP_MODE_UNPRIVILEGED
            };
            motd.as_str()
        }
        ResponseBody::Error { message } => {
            header[4] = RESP_STATUS_ERROR;
            header[5] = RESP_MODE_UNPRIVILEGED;
            message.as_str()
        }
    };

    w.write_all(&header)?;
    write_lenstr(w, payload.as_bytes())?;
    w.flush()?;
    Ok(())
}

fn read_exact_or_short(r: &mut impl Read, buf: &mut [u8]) -> Result<(), WireError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(WireError::ShortRead),
        Err(e) => Err(e.into()),
    }
}

fn read_lenstr(r: &mut impl Read, capacity: usize) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 2];
    read_exact_or_short(r, &mut len_buf)?;
    let declared = u16::from_be_bytes(len_buf) as usize;

    if declared >= capacity {
        return Err(WireError::FieldTooLarge {
            declared,
            limit: capacity,
        });
    }

    let mut buf = vec![0u8; declared];
    read_exact_or_short(r, &mut buf)?;
    Ok(buf)
}

fn write_lenstr(w: &mut impl Write, bytes: &[u8]) -> Result<(), WireError> {
    let len: u16 = bytes
        .len()
        .try_into()
        .expect("caller-constructed response fields fit in u16");
    w.write_all(&len.to_be_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn zero_scratch(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        unsafe { std::ptr::write_volatile(b, 0) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_request(username: &[u8], password: &[u8], session_id: &[u8], flags: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.push(PROTO_VERSION);
        buf.push(flags);
        buf.extend_from_slice(&[0, 0, 0]);
        for field in [username, password, session_id] {
            buf.extend_from_slice(&(field.len() as u16).to_be_bytes());
            buf.extend_from_slice(field);
        }
        buf
    }

    #[test]
    fn round_trips_within_limits() {
        let encoded = encode_request(b"alice", b"correct horse", b"s-01", REQ_FLAG_VERBOSE);
        let mut cursor = Cursor::new(encoded);
        let req = read_request(&mut cursor).unwrap();
        assert_eq!(req.username, "alice");
        assert_eq!(req.secret.as_bytes(), b"correct horse");
        assert_eq!(req.session_id, "s-01");
        assert!(req.verbose);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = encode_request(b"alice", b"pw", b"s-01", 0);
        encoded[0] = b'X';
        let mut cursor = Cursor::new(encoded);
        assert!(matches!(
            read_request(&mut cursor),
            Err(WireError::BadMagic)
        ));
    }

    #[test]
    fn rejects_field_at_capacity() {
        let huge_username = vec![b'a'; MAX_USERNAME_LEN];
        let encoded = encode_request(&huge_username, b"pw", b"s-01", 0);
        let mut cursor = Cursor::new(encoded);
        assert!(matches!(
            read_request(&mut cursor),
            Err(WireError::FieldTooLarge { .. })
        ));
    }

    #[test]
    fn accepts_field_one_below_capacity() {
        let username = vec![b'a'; MAX_USERNAME_LEN - 1];
        let encoded = encode_request(&username, b"pw", b"s-01", 0);
        let mut cursor = Cursor::new(encoded);
        let req = read_request(&mut cursor).unwrap();
        assert_eq!(req.username.len(), MAX_USERNAME_LEN - 1);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut encoded = encode_request(b"alice", b"pw", b"s-01", 0);
        encoded.truncate(5);
        let mut cursor = Cursor::new(encoded);
        assert!(matches!(
            read_request(&mut cursor),
            Err(WireError::ShortRead)
        ));
    }

    #[test]
    fn writes_ok_response() {
        let mut out = Vec::new();
        write_response(
            &mut out,
            &ResponseBody::Ok {
                motd: "Welcome Alice".to_string(),
                privileged: false,
            },
        )
        .unwrap();
        assert_eq!(
            &out[..8],
            &[0x4C, 0x49, 0x4F, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(&out[8..10], &(13u16).to_be_bytes());
        assert_eq!(&out[10..], b"Welcome Alice");
    }

    #[test]
    fn writes_privileged_response() {
        let mut out = Vec::new();
        write_response(
            &mut out,
            &ResponseBody::Ok {
                motd: String::new(),
                privileged: true,
            },
        )
        .unwrap();
        assert_eq!(
            &out[..8],
            &[0x4C, 0x49, 0x4F, 0x01, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(&out[8..10], &(0u16).to_be_bytes());
    }
}
