use log::{debug, info, warn};
use regex::Regex;

/// Gate for header injection based on accepted recipient addresses.
///
/// No patterns means every message gets the headers.
#[derive(Debug, Default, Clone)]
pub struct RecipientMatcher {
    patterns: Vec<Regex>,
    rejected: u64,
}

impl RecipientMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and add a pattern. A pattern that fails to compile is
    /// reported and left out; returns whether it was added.
    pub fn add_pattern(&mut self, pattern: &str) -> bool {
        match Regex::new(pattern) {
            Ok(re) => {
                info!("[recipient] pattern: `{}`", re);
                self.patterns.push(re);
                true
            }
            Err(e) => {
                warn!("[recipient] add pattern `{}` failed with: {}", pattern, e);
                self.rejected += 1;
                false
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Patterns left out because they failed to compile.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn matches(&self, recipients: &[String]) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        for recipient in recipients {
            debug!("[recipient] checking patterns for: {}", recipient);
            if self.patterns.iter().any(|p| p.is_match(recipient)) {
                debug!("[recipient] match found: {}", recipient);
                return true;
            }
            debug!("[recipient] no match for: {}", recipient);
        }
        false
    }
}
