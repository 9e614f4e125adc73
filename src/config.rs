use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{FilterError, Result};
use crate::injector::{HeaderInjector, HeaderSet};
use crate::recipient::RecipientMatcher;

/// Settings gathered from the config file and the command line.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// `NAME=VALUE` header strings.
    pub header: Vec<String>,
    /// Recipient address patterns.
    pub recipient: Vec<String>,
    pub verbose: bool,
}

impl Settings {
    pub fn from_json(content: &str, path: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|source| FilterError::ConfigFile {
            path: path.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!("[config] reading {:?}", path);
        let content = fs::read_to_string(path)?;
        Self::from_json(&content, &path.display().to_string())
    }

    /// Append command line values after the file's.
    pub fn merge(mut self, header: Vec<String>, recipient: Vec<String>, verbose: bool) -> Self {
        self.header.extend(header);
        self.recipient.extend(recipient);
        self.verbose |= verbose;
        self
    }

    pub fn headers(&self) -> Result<HeaderSet> {
        let mut headers = HeaderSet::new();
        for arg in &self.header {
            headers.add_arg(arg)?;
        }
        if headers.is_empty() {
            return Err(FilterError::NoHeaders);
        }
        Ok(headers)
    }

    pub fn recipients(&self) -> RecipientMatcher {
        let mut matcher = RecipientMatcher::new();
        for pattern in &self.recipient {
            matcher.add_pattern(pattern);
        }
        if matcher.is_empty() {
            info!("[config] no recipient patterns, headers added to every message");
        }
        matcher
    }

    pub fn injector(&self) -> Result<HeaderInjector> {
        Ok(HeaderInjector::new(self.headers()?, self.recipients()))
    }
}
