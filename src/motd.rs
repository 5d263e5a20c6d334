//! Bounded MOTD collector. An append-only buffer that accumulates
//! informational/error text surfaced by the host verifier during
//! authentication, capped so a misbehaving verifier cannot grow the
//! response payload without limit. Deliberately knows nothing about the
//! secret-supplying side of the conversation.

use crate::consts::MAX_MOTD_LEN;

#[derive(Default)]
pub struct MotdCollector {
    buf: String,
}

impl MotdCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `line` followed by a newline, unless doing so would exceed
    /// the bound, in which case the line is silently dropped and nothing
    /// further is appended.
    pub fn push_line(&mut self, line: &str) {
        if self.buf.len() >= MAX_MOTD_LEN {
            return;
        }
        let needed = line.len() + 1;
        if self.buf.len() + needed > MAX_MOTD_LEN {
            return;
        }
        self.buf.push_str(line);
        self.buf.push('\n');
    }

    pub fn into_string(mut self) -> String {
        if self.buf.ends_with('\n') {
            self.buf.pop();
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_lines_with_newline() {
        let mut m = MotdCollector::new();
        m.push_line("Welcome Alice");
        assert_eq!(m.into_string(), "Welcome Alice");
    }

    #[test]
    fn multiple_lines() {
        let mut m = MotdCollector::new();
        m.push_line("line one");
        m.push_line("line two");
        assert_eq!(m.into_string(), "line one\nline two");
    }

    #[test]
    fn drops_line_that_would_overflow_bound() {
        let mut m = MotdCollector::new();
        m.push_line(&"a".repeat(MAX_MOTD_LEN - 1));
        let before = m.buf.clone();
        m.push_line("more");
        assert_eq!(m.buf, before);
    }
}
