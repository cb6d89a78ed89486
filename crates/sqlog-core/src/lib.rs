//! # sqlog-core
//!
//! Shared vocabulary for the sqlog crates:
//!
//! - **Entries**: [`LogEntry`] as produced by loggers, [`SequencedEntry`] once a
//!   flush snapshot has given it an ordinal
//! - **Levels**: [`LogLevel`] with the tinyint severity stored in the database
//! - **Time**: the [`Clock`] seam, [`SystemClock`] and the test [`ManualClock`]
//! - **Backoff**: linear retry backoff with a ceiling
//! - **Text**: char-boundary-safe truncation for fixed-width columns

#![deny(unsafe_code)]

pub mod backoff;
pub mod clock;
pub mod text;
pub mod types;

pub use backoff::linear_backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use text::truncate_chars;
pub use types::{LogEntry, LogLevel, SequencedEntry};
