#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Dual-source environment explorer: live runtime filesystem plus a
//! build-time snapshot, with audit and job-relay models on top.

pub mod api;
pub mod audit;
pub mod capture;
pub mod error;
pub mod explorer;
pub mod job;
pub mod listing;
pub mod model;
pub mod mutate;
pub mod path;
pub mod resolve;
pub mod snapshot;

mod util;

pub use error::{ConsoleError, Operation, Result};
pub use explorer::{Explorer, DEFAULT_VIEW_LIMIT};
pub use model::Source;
pub use snapshot::SnapshotIndex;
pub use util::{new_ulid, now_ms};
