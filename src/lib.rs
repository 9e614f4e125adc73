//! smtpd filter that adds static header lines to messages, optionally only
//! when a recipient matches one of a set of patterns.

pub mod config;
pub mod error;
pub mod filter;
pub mod injector;
pub mod recipient;
pub mod record;
pub mod session;

pub use error::{FilterError, Result};
pub use filter::Filter;
