use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Init,
    Data,
    Commit,
    Rollback,
}

impl MessageState {
    fn is_terminal(self) -> bool {
        matches!(self, MessageState::Commit | MessageState::Rollback)
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub state: MessageState,
    pub in_header: bool,
}

impl Message {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            from: String::new(),
            to: Vec::new(),
            state: MessageState::Init,
            in_header: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub rdns: String,
    pub confirmed: bool,
    pub remote: String,
    pub local: String,
    pub authorized_user: String,
    /// Message currently receiving data lines; empty when none.
    pub data_message: String,
    pub messages: HashMap<String, Message>,
}

impl Session {
    pub fn new(id: &str, rdns: &str, confirmed: bool, remote: &str, local: &str) -> Self {
        Self {
            id: id.to_string(),
            rdns: rdns.to_string(),
            confirmed,
            remote: remote.to_string(),
            local: local.to_string(),
            authorized_user: String::new(),
            data_message: String::new(),
            messages: HashMap::new(),
        }
    }

    /// The message named by `data_message`, if it is still tracked.
    pub fn data_message_mut(&mut self) -> Option<&mut Message> {
        if self.data_message.is_empty() {
            return None;
        }
        self.messages.get_mut(&self.data_message)
    }

    fn prune_finished(&mut self, keep: &str) {
        self.messages.retain(|id, m| id == keep || !m.state.is_terminal());
    }
}

/// Connection and transaction state built from `report` events.
///
/// Every operation tolerates references to unknown sessions or messages:
/// the event is reported and dropped.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
    anomalies: u64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, sid: &str) -> Option<&Session> {
        self.sessions.get(sid)
    }

    pub fn message(&self, sid: &str, mid: &str) -> Option<&Message> {
        self.sessions.get(sid).and_then(|s| s.messages.get(mid))
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn report(&mut self, args: fmt::Arguments<'_>) {
        self.anomalies += 1;
        warn!("{}", args);
    }

    pub fn session_mut(&mut self, name: &str, sid: &str) -> Option<&mut Session> {
        if !self.sessions.contains_key(sid) {
            self.report(format_args!("[{}] unknown session: {}", name, sid));
            return None;
        }
        self.sessions.get_mut(sid)
    }

    fn message_mut(&mut self, name: &str, sid: &str, mid: &str) -> Option<&mut Session> {
        let known = self.session_mut(name, sid)?.messages.contains_key(mid);
        if !known {
            self.report(format_args!(
                "[{}] session {} unknown message: {}",
                name, sid, mid
            ));
            return None;
        }
        self.sessions.get_mut(sid)
    }

    pub fn link_connect(
        &mut self,
        name: &str,
        sid: &str,
        rdns: &str,
        confirmed: &str,
        remote: &str,
        local: &str,
    ) {
        debug!(
            "[{}] session={} rdns={} confirmed={} src={} dst={}",
            name, sid, rdns, confirmed, remote, local
        );
        if self.sessions.contains_key(sid) {
            self.report(format_args!("[{}] existing session: {}", name, sid));
            return;
        }
        self.sessions.insert(
            sid.to_string(),
            Session::new(sid, rdns, confirmed == "pass", remote, local),
        );
    }

    pub fn link_disconnect(&mut self, name: &str, sid: &str) {
        debug!("[{}] session={}", name, sid);
        if self.sessions.remove(sid).is_none() {
            self.report(format_args!("[{}] unknown session: {}", name, sid));
        }
    }

    pub fn link_auth(&mut self, name: &str, sid: &str, result: &str, username: &str) {
        debug!(
            "[{}] session={} result={} username={}",
            name, sid, result, username
        );
        if let Some(session) = self.session_mut(name, sid) {
            if result == "pass" {
                session.authorized_user = username.to_string();
            }
        }
    }

    pub fn tx_reset(&mut self, name: &str, sid: &str, mid: &str) {
        debug!("[{}] session={} message={}", name, sid, mid);
        if let Some(session) = self.message_mut(name, sid, mid) {
            session.messages.insert(mid.to_string(), Message::new(mid));
            session.prune_finished(mid);
        }
    }

    pub fn tx_begin(&mut self, name: &str, sid: &str, mid: &str) {
        debug!("[{}] session={} message={}", name, sid, mid);
        let exists = match self.session_mut(name, sid) {
            Some(session) => session.messages.contains_key(mid),
            None => return,
        };
        if exists {
            self.report(format_args!(
                "[{}] unexpected tx-begin in session {} for existing message {}",
                name, sid, mid
            ));
            return;
        }
        if let Some(session) = self.sessions.get_mut(sid) {
            session.prune_finished(mid);
            session.messages.insert(mid.to_string(), Message::new(mid));
        }
    }

    pub fn tx_mail(&mut self, name: &str, sid: &str, mid: &str, result: &str, address: &str) {
        debug!(
            "[{}] session={} message={} result={} address={}",
            name, sid, mid, result, address
        );
        if let Some(message) = self.tracked(name, sid, mid) {
            if result == "ok" {
                message.from = address.to_string();
            }
        }
    }

    pub fn tx_rcpt(&mut self, name: &str, sid: &str, mid: &str, result: &str, address: &str) {
        debug!(
            "[{}] session={} message={} result={} address={}",
            name, sid, mid, result, address
        );
        if let Some(message) = self.tracked(name, sid, mid) {
            if result == "ok" {
                message.to.push(address.to_string());
            }
        }
    }

    pub fn tx_data(&mut self, name: &str, sid: &str, mid: &str, result: &str) {
        debug!(
            "[{}] session={} message={} result={}",
            name, sid, mid, result
        );
        if result != "ok" {
            // still report unknown references
            self.tracked(name, sid, mid);
            return;
        }
        if let Some(session) = self.message_mut(name, sid, mid) {
            session.data_message = mid.to_string();
            if let Some(message) = session.messages.get_mut(mid) {
                message.state = MessageState::Data;
                message.in_header = true;
            }
        }
    }

    pub fn tx_commit(&mut self, name: &str, sid: &str, mid: &str, size: &str) {
        debug!(
            "[{}] session={} message={} size={}",
            name, sid, mid, size
        );
        if let Some(message) = self.tracked(name, sid, mid) {
            message.state = MessageState::Commit;
        }
    }

    pub fn tx_rollback(&mut self, name: &str, sid: &str, mid: &str) {
        debug!("[{}] session={} message={}", name, sid, mid);
        if let Some(message) = self.tracked(name, sid, mid) {
            message.state = MessageState::Rollback;
        }
    }

    fn tracked(&mut self, name: &str, sid: &str, mid: &str) -> Option<&mut Message> {
        self.message_mut(name, sid, mid)?.messages.get_mut(mid)
    }
}
