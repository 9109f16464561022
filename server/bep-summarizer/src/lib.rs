//! Build Event Protocol invocation summarizer.
//!
//! Folds the ordered event stream of one build/test invocation into a single
//! InvocationSummary. A problem detector watches the same stream; its findings
//! are attached to the summary unless the build succeeded or was interrupted.
//!
//! No DB, no network; pure computation over an in-order event source.

pub mod command_line;
pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod metrics;
pub mod rollup;
pub mod source;
pub mod summarizer;
pub mod types;

pub use config::{Config, ViolationPolicy};
pub use detector::{Detector, ProblemDetector};
pub use error::{DetectorError, SummaryError};
pub use event::{BuildEvent, Payload};
pub use source::{summarize, EventReader};
pub use summarizer::{summarize_events, Summarizer};
pub use types::{InvocationSummary, Problem};
