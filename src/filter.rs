use log::{debug, info, warn};
use std::io::{BufRead, Write};

use crate::error::{FilterError, Result};
use crate::injector::HeaderInjector;
use crate::record::{trim_line_end, Record};
use crate::session::SessionTable;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Field positions shared by `report` and `filter` records.
const FID_NAME: usize = 4;
const FID_SID: usize = 5;
const FID_TOKEN: usize = 6;
const FID_DATA: usize = 7;
const MIN_FIELDS: usize = 6;

pub const REPORTS: [&str; 10] = [
    "link-connect",
    "link-disconnect",
    "link-auth",
    "tx-reset",
    "tx-begin",
    "tx-mail",
    "tx-rcpt",
    "tx-data",
    "tx-commit",
    "tx-rollback",
];

pub const FILTERS: [&str; 1] = ["data-line"];

/// Protocol side of the filter: handshake, registration and the event loop.
pub struct Filter<R, W> {
    name: String,
    pub protocol: String,
    pub subsystem: String,
    sessions: SessionTable,
    injector: HeaderInjector,
    anomalies: u64,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Filter<R, W> {
    pub fn new(name: &str, injector: HeaderInjector, input: R, output: W) -> Self {
        let rejected = injector.recipients().rejected();
        Self {
            name: name.to_string(),
            protocol: String::new(),
            subsystem: String::new(),
            sessions: SessionTable::new(),
            injector,
            anomalies: rejected,
            input,
            output,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Total anomalies reported so far, tracker included.
    pub fn anomalies(&self) -> u64 {
        self.anomalies + self.sessions.anomalies()
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn anomaly(&mut self, args: std::fmt::Arguments<'_>) {
        self.anomalies += 1;
        warn!("{}", args);
    }

    /// Run the whole filter lifetime. Returns `Ok` once the daemon closes
    /// the input stream; that is still reported as unexpected.
    pub fn run(&mut self) -> Result<()> {
        info!("Starting {} v{}", self.name, VERSION);
        for (name, value) in self.injector.headers().iter() {
            info!("[{}] header: '{}: {}'", self.name, name, value);
        }
        self.config()?;
        self.register();
        self.dispatch()
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        buf.clear();
        let n = self.input.read_until(b'\n', buf)?;
        Ok(n > 0)
    }

    /// Consume `config|...` lines up to `config|ready`.
    pub fn config(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        while self.read_line(&mut buf)? {
            let line = trim_line_end(&buf);
            let record = Record::parse(line);
            debug!("[config] {}", String::from_utf8_lossy(line));
            if record.len() < 2 || record.field(0) != Some(&b"config"[..]) {
                return Err(FilterError::MalformedConfig(
                    String::from_utf8_lossy(line).into_owned(),
                ));
            }
            let key = record.text(1);
            if key == "ready" {
                info!(
                    "[config] ready protocol={} subsystem={}",
                    self.protocol, self.subsystem
                );
                return Ok(());
            }
            if key != "protocol" && key != "subsystem" {
                continue;
            }
            let value = match record.suffix(2) {
                Some(v) => String::from_utf8_lossy(v).into_owned(),
                None => {
                    return Err(FilterError::MalformedConfig(
                        String::from_utf8_lossy(line).into_owned(),
                    ))
                }
            };
            if key == "protocol" {
                self.protocol = value;
            } else {
                self.subsystem = value;
            }
        }
        Err(FilterError::HandshakeEof)
    }

    /// Subscribe to the events this filter handles.
    pub fn register(&mut self) {
        let mut lines: Vec<String> = Vec::new();
        for name in REPORTS {
            lines.push(format!("register|report|{}|{}", self.subsystem, name));
        }
        for name in FILTERS {
            lines.push(format!("register|filter|{}|{}", self.subsystem, name));
        }
        lines.push("register|ready".to_string());

        for line in lines {
            debug!("[register] {}", line);
            if let Err(e) = writeln!(self.output, "{}", line) {
                self.anomaly(format_args!("[register] output failed with: {}", e));
            }
        }
        self.flush("register");
    }

    fn flush(&mut self, name: &str) {
        if let Err(e) = self.output.flush() {
            self.anomaly(format_args!("[{}] flush failed with: {}", name, e));
        }
    }

    /// Main event loop; only returns when the input ends or fails.
    pub fn dispatch(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            if !self.read_line(&mut buf)? {
                break;
            }
            let line = trim_line_end(&buf);
            let record = Record::parse(line);
            if record.len() < MIN_FIELDS {
                return Err(FilterError::MalformedRecord(
                    String::from_utf8_lossy(line).into_owned(),
                ));
            }
            match record.field(0) {
                Some(b"report") => self.report(&record),
                Some(b"filter") => self.filter(&record),
                _ => {
                    let name = self.name.clone();
                    self.anomaly(format_args!(
                        "[{}] unexpected input: {}",
                        name,
                        String::from_utf8_lossy(line)
                    ))
                }
            }
        }
        let name = self.name.clone();
        self.anomaly(format_args!("[{}] unexpected EOF on stdin", name));
        Ok(())
    }

    fn require(&mut self, name: &str, record: &Record<'_>, count: usize) -> bool {
        if record.len() < count {
            self.anomaly(format_args!(
                "[{}] expected {} fields, got {}: '{}'",
                name,
                count,
                record.len(),
                String::from_utf8_lossy(record.line())
            ));
            return false;
        }
        true
    }

    fn report(&mut self, record: &Record<'_>) {
        let name = record.text(FID_NAME);
        let sid = record.text(FID_SID);
        let f = |i| record.text(i);
        match name.as_ref() {
            "link-connect" => {
                if self.require(&name, record, 10) {
                    self.sessions.link_connect(&name, &sid, &f(6), &f(7), &f(8), &f(9));
                }
            }
            "link-disconnect" => self.sessions.link_disconnect(&name, &sid),
            "link-auth" => {
                if self.require(&name, record, 8) {
                    self.sessions.link_auth(&name, &sid, &f(6), &f(7));
                }
            }
            "tx-reset" => {
                if self.require(&name, record, 7) {
                    self.sessions.tx_reset(&name, &sid, &f(6));
                }
            }
            "tx-begin" => {
                if self.require(&name, record, 7) {
                    self.sessions.tx_begin(&name, &sid, &f(6));
                }
            }
            "tx-mail" => {
                if self.require(&name, record, 9) {
                    self.sessions.tx_mail(&name, &sid, &f(6), &f(7), &f(8));
                }
            }
            "tx-rcpt" => {
                if self.require(&name, record, 9) {
                    self.sessions.tx_rcpt(&name, &sid, &f(6), &f(7), &f(8));
                }
            }
            "tx-data" => {
                if self.require(&name, record, 8) {
                    self.sessions.tx_data(&name, &sid, &f(6), &f(7));
                }
            }
            "tx-commit" => {
                if self.require(&name, record, 8) {
                    self.sessions.tx_commit(&name, &sid, &f(6), &f(7));
                }
            }
            "tx-rollback" => {
                if self.require(&name, record, 7) {
                    self.sessions.tx_rollback(&name, &sid, &f(6));
                }
            }
            _ => debug!("[{}] ignoring report: {}", self.name, name),
        }
    }

    fn filter(&mut self, record: &Record<'_>) {
        let phase = record.text(FID_NAME);
        match phase.as_ref() {
            "data-line" => {
                if !self.require(&phase, record, FID_DATA + 1) {
                    return;
                }
                let sid = record.text(FID_SID);
                let token = record.text(FID_TOKEN);
                let line = record.suffix(FID_DATA).unwrap_or_default();
                debug!(
                    "[{}] sid={} token={} line={}",
                    phase,
                    sid,
                    token,
                    String::from_utf8_lossy(line)
                );
                let lines = self.injector.process(&mut self.sessions, &phase, &sid, line);
                // echoed as received, not through the lossy text view
                let sid = record.field(FID_SID).unwrap_or_default();
                let token = record.field(FID_TOKEN).unwrap_or_default();
                for out in lines {
                    if let Err(e) = self.write_data_line(sid, token, &out) {
                        self.anomaly(format_args!("[{}] failed writing data line: {}", phase, e));
                    }
                }
                self.flush(&phase);
            }
            _ => debug!("[{}] ignoring filter phase: {}", self.name, phase),
        }
    }

    fn write_data_line(&mut self, sid: &[u8], token: &[u8], line: &[u8]) -> std::io::Result<()> {
        self.output.write_all(b"filter-dataline|")?;
        self.output.write_all(sid)?;
        self.output.write_all(b"|")?;
        self.output.write_all(token)?;
        self.output.write_all(b"|")?;
        self.output.write_all(line)?;
        self.output.write_all(b"\n")
    }
}
