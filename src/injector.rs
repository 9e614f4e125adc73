use log::{debug, info};
use std::borrow::Cow;

use crate::error::{FilterError, Result};
use crate::recipient::RecipientMatcher;
use crate::session::SessionTable;

/// Header lines to add, in the order they were configured.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header; an existing name keeps its position and takes the new value.
    pub fn add(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// Add a header given as `NAME=VALUE`.
    pub fn add_arg(&mut self, arg: &str) -> Result<()> {
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| FilterError::InvalidHeader(arg.to_string()))?;
        self.add(name, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|(n, v)| format!("{}: {}", n, v))
    }
}

/// Empty once surrounding whitespace is trimmed, Unicode spaces included.
fn is_blank(line: &[u8]) -> bool {
    std::str::from_utf8(line).is_ok_and(|s| s.trim().is_empty())
}

pub struct HeaderInjector {
    headers: HeaderSet,
    recipients: RecipientMatcher,
}

impl HeaderInjector {
    pub fn new(headers: HeaderSet, recipients: RecipientMatcher) -> Self {
        Self { headers, recipients }
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    pub fn recipients(&self) -> &RecipientMatcher {
        &self.recipients
    }

    /// Lines to send back for one `data-line` record, in order.
    ///
    /// The line itself always comes back. At the first blank line of a
    /// message in body state the configured headers are placed in front of
    /// it when the recipients allow, and the message leaves its header
    /// block either way.
    pub fn process<'a>(
        &self,
        sessions: &mut SessionTable,
        name: &str,
        sid: &str,
        line: &'a [u8],
    ) -> Vec<Cow<'a, [u8]>> {
        let mut lines = vec![Cow::Borrowed(line)];
        let Some(session) = sessions.session_mut(name, sid) else {
            return lines;
        };
        let Some(message) = session.data_message_mut() else {
            let mid = session.data_message.clone();
            sessions.report(format_args!(
                "[{}] session {} unknown message: {}",
                name, sid, mid
            ));
            return lines;
        };
        if !message.in_header || !is_blank(line) {
            return lines;
        }

        if self.recipients.matches(&message.to) {
            lines.clear();
            for header in self.headers.lines() {
                info!("[{}] session={} adding header '{}'", name, sid, header);
                lines.push(Cow::Owned(header.into_bytes()));
            }
            lines.push(Cow::Borrowed(line));
        } else {
            debug!(
                "[{}] session={} message={} no recipient match, headers not added",
                name, sid, message.id
            );
        }
        message.in_header = false;
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderSet {
        let mut h = HeaderSet::new();
        for (n, v) in pairs {
            h.add(n, v);
        }
        h
    }

    fn in_data(rcpts: &[&str]) -> SessionTable {
        let mut t = SessionTable::new();
        t.link_connect("link-connect", "s1", "rdns", "pass", "1.2.3.4:1", "5.6.7.8:25");
        t.tx_begin("tx-begin", "s1", "m1");
        for r in rcpts {
            t.tx_rcpt("tx-rcpt", "s1", "m1", "ok", r);
        }
        t.tx_data("tx-data", "s1", "m1", "ok");
        t
    }

    fn owned(lines: Vec<Cow<'_, [u8]>>) -> Vec<Vec<u8>> {
        lines.into_iter().map(Cow::into_owned).collect()
    }

    #[test]
    fn header_set_keeps_order_and_replaces() {
        let mut h = HeaderSet::new();
        h.add_arg("X-One=1").unwrap();
        h.add_arg("X-Two=a=b").unwrap();
        h.add_arg("X-One=again").unwrap();
        let got: Vec<_> = h.iter().collect();
        assert_eq!(got, vec![("X-One", "again"), ("X-Two", "a=b")]);
    }

    #[test]
    fn header_arg_without_equals_fails() {
        let mut h = HeaderSet::new();
        assert!(matches!(
            h.add_arg("X-Broken"),
            Err(FilterError::InvalidHeader(ref a)) if a == "X-Broken"
        ));
        assert!(h.is_empty());
    }

    #[test]
    fn injects_before_blank_line_once() {
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), RecipientMatcher::new());
        let mut t = in_data(&["to@y"]);

        assert_eq!(owned(inj.process(&mut t, "data-line", "s1", b"Subject: hi")), vec![b"Subject: hi".to_vec()]);
        assert_eq!(
            owned(inj.process(&mut t, "data-line", "s1", b"")),
            vec![b"X-Added: v".to_vec(), b"".to_vec()]
        );
        assert!(!t.message("s1", "m1").unwrap().in_header);
        assert_eq!(owned(inj.process(&mut t, "data-line", "s1", b"")), vec![b"".to_vec()]);
        assert_eq!(owned(inj.process(&mut t, "data-line", "s1", b"body")), vec![b"body".to_vec()]);
    }

    #[test]
    fn whitespace_only_line_is_boundary() {
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), RecipientMatcher::new());
        let mut t = in_data(&[]);
        assert_eq!(
            owned(inj.process(&mut t, "data-line", "s1", b" \t")),
            vec![b"X-Added: v".to_vec(), b" \t".to_vec()]
        );
    }

    #[test]
    fn vertical_tab_and_nbsp_are_boundaries() {
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), RecipientMatcher::new());
        let mut t = in_data(&[]);
        assert_eq!(
            owned(inj.process(&mut t, "data-line", "s1", b"\x0b")),
            vec![b"X-Added: v".to_vec(), b"\x0b".to_vec()]
        );
        let mut t = in_data(&[]);
        assert_eq!(
            owned(inj.process(&mut t, "data-line", "s1", "\u{a0}".as_bytes())),
            vec![b"X-Added: v".to_vec(), "\u{a0}".as_bytes().to_vec()]
        );
    }

    #[test]
    fn invalid_utf8_line_is_not_a_boundary() {
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), RecipientMatcher::new());
        let mut t = in_data(&[]);
        assert_eq!(owned(inj.process(&mut t, "data-line", "s1", b"\xff")), vec![b"\xff".to_vec()]);
        assert!(t.message("s1", "m1").unwrap().in_header);
    }

    #[test]
    fn multiple_headers_in_configured_order() {
        let inj = HeaderInjector::new(
            headers(&[("X-B", "2"), ("X-A", "1"), ("X-C", "3")]),
            RecipientMatcher::new(),
        );
        let mut t = in_data(&[]);
        assert_eq!(
            owned(inj.process(&mut t, "data-line", "s1", b"")),
            vec![b"X-B: 2".to_vec(), b"X-A: 1".to_vec(), b"X-C: 3".to_vec(), b"".to_vec()]
        );
    }

    #[test]
    fn gated_by_recipient_patterns() {
        let mut m = RecipientMatcher::new();
        m.add_pattern(r"^a.*@example\.com$");
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), m);

        let mut t = in_data(&["b@example.com"]);
        assert_eq!(owned(inj.process(&mut t, "data-line", "s1", b"")), vec![b"".to_vec()]);
        assert!(!t.message("s1", "m1").unwrap().in_header);

        let mut t = in_data(&["b@example.com", "a1@example.com"]);
        assert_eq!(
            owned(inj.process(&mut t, "data-line", "s1", b"")),
            vec![b"X-Added: v".to_vec(), b"".to_vec()]
        );
    }

    #[test]
    fn unknown_session_passes_through() {
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), RecipientMatcher::new());
        let mut t = SessionTable::new();
        assert_eq!(owned(inj.process(&mut t, "data-line", "ghost", b"")), vec![b"".to_vec()]);
        assert_eq!(t.anomalies(), 1);
    }

    #[test]
    fn no_data_message_passes_through() {
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), RecipientMatcher::new());
        let mut t = SessionTable::new();
        t.link_connect("link-connect", "s1", "rdns", "pass", "a", "b");
        t.tx_begin("tx-begin", "s1", "m1");
        assert_eq!(owned(inj.process(&mut t, "data-line", "s1", b"")), vec![b"".to_vec()]);
        assert_eq!(t.anomalies(), 1);
        assert!(t.message("s1", "m1").unwrap().in_header);
    }

    #[test]
    fn next_transaction_rearms_header_block() {
        let inj = HeaderInjector::new(headers(&[("X-Added", "v")]), RecipientMatcher::new());
        let mut t = in_data(&[]);
        inj.process(&mut t, "data-line", "s1", b"");
        t.tx_commit("tx-commit", "s1", "m1", "10");
        t.tx_begin("tx-begin", "s1", "m2");
        t.tx_data("tx-data", "s1", "m2", "ok");
        assert_eq!(
            owned(inj.process(&mut t, "data-line", "s1", b"")),
            vec![b"X-Added: v".to_vec(), b"".to_vec()]
        );
    }
}
