//! Fax number discovery for organizations
//!
//! A name is turned into a candidate page (by search, or a supplied URL),
//! the page is fetched under a pacing and backoff policy, and a ranked set of
//! extraction strategies looks for a fax number in its contact area.
//! [`batch`] runs that lookup over a whole CSV table with checkpoints.

pub mod batch;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod finder;
pub mod logger;
pub mod normalize;
pub mod page;
pub mod patterns;
pub mod records;
pub mod region;
pub mod resolver;
pub mod retry;
pub mod search;

pub use batch::{spawn_batch, BatchDriver, BatchHandle, BatchOutcome};
pub use checkpoint::{CsvSink, RecordSink, ResumeMode};
pub use error::FaxError;
pub use events::{BatchEvent, CancelToken, EventSender, RunContext};
pub use extract::{FaxExtractor, FaxMatch};
pub use finder::{FaxFinder, FaxLookup};
pub use normalize::normalize;
pub use records::{Record, RecordTable};
