//! Structured error types for the summarizer and the problem detector.

use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SummaryError {
  /// The event stream broke an ordering or labelling rule of the protocol.
  #[error("protocol violation: {event}: {reason}")]
  ProtocolViolation { event: &'static str, reason: String },

  #[error("failed to parse {name} (value: {value}) as an int: {source}")]
  EnvVar {
    name: String,
    value: String,
    #[source]
    source: ParseIntError,
  },

  #[error("could not open {location}: {source}")]
  Io {
    location: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read build event: line {line}: {source}")]
  Read {
    line: usize,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to get build event: line {line}: {source}")]
  Decode {
    line: usize,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to process event (with id: {id}): {source}")]
  Event {
    id: String,
    #[source]
    source: Box<SummaryError>,
  },

  #[error("problem detection: {0}")]
  Detector(#[from] DetectorError),
}

impl SummaryError {
  pub fn protocol(event: &'static str, reason: impl Into<String>) -> Self {
    Self::ProtocolViolation {
      event,
      reason: reason.into(),
    }
  }

  pub fn in_event(id: impl Into<String>, source: SummaryError) -> Self {
    Self::Event {
      id: id.into(),
      source: Box::new(source),
    }
  }

  pub fn is_protocol_violation(&self) -> bool {
    match self {
      Self::ProtocolViolation { .. } => true,
      Self::Event { source, .. } => source.is_protocol_violation(),
      _ => false,
    }
  }

  /// Id of the event that failed, when the error came out of a handler.
  pub fn event_id(&self) -> Option<&str> {
    match self {
      Self::Event { id, .. } => Some(id),
      _ => None,
    }
  }
}

/// Conditions the problem detector could not classify. Never raised mid-stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectorError {
  #[error("unlabeled {kind} event reported a failure")]
  UnlabeledFailure { kind: &'static str },
}
