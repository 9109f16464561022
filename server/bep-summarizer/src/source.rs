//! Reading an event stream from disk: one JSON-encoded event per line.

use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::config::Config;
use crate::error::SummaryError;
use crate::event::BuildEvent;
use crate::summarizer::{summarize_events, Summarizer};
use crate::types::InvocationSummary;

/// Pull-based reader over newline-delimited events. Blank lines are skipped.
pub struct EventReader<R> {
  lines: std::io::Lines<R>,
  line: usize,
}

impl<R: BufRead> EventReader<R> {
  pub fn new(reader: R) -> Self {
    Self {
      lines: reader.lines(),
      line: 0,
    }
  }
}

impl<R: BufRead> Iterator for EventReader<R> {
  type Item = Result<BuildEvent, SummaryError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let raw = self.lines.next()?;
      self.line += 1;
      let raw = match raw {
        Ok(raw) => raw,
        Err(source) => return Some(Err(SummaryError::Read { line: self.line, source })),
      };
      if raw.trim().is_empty() {
        continue;
      }
      return Some(
        serde_json::from_str(&raw).map_err(|source| SummaryError::Decode { line: self.line, source }),
      );
    }
  }
}

/// Open an event file.
pub fn open(location: &str) -> Result<EventReader<BufReader<File>>, SummaryError> {
  let file = File::open(location).map_err(|source| SummaryError::Io {
    location: location.to_string(),
    source,
  })?;
  Ok(EventReader::new(BufReader::new(file)))
}

/// Summarize the event file at `location`.
///
/// Returns the summary and whether the stream reached its final event.
pub fn summarize(location: &str, config: Config) -> Result<(InvocationSummary, bool), SummaryError> {
  let events = open(location)?;
  tracing::info!(location, "summarizing build events");
  let summarizer = Summarizer::new(config).with_event_file(location);
  summarize_events(summarizer, events)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::Payload;
  use std::io::Cursor;

  #[test]
  fn reads_events_and_skips_blank_lines() {
    let input = concat!(
      r#"{"id":"1","payload":{"kind":"fetch","url":"https://x","success":true}}"#,
      "\n\n   \n",
      r#"{"id":"2","last_message":true,"payload":{"kind":"something_new","foo":1}}"#,
      "\n",
    );
    let events: Vec<BuildEvent> = EventReader::new(Cursor::new(input))
      .collect::<Result<_, _>>()
      .unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0].payload, Payload::Fetch(ref f) if f.success));
    assert!(matches!(events[1].payload, Payload::Unknown));
    assert!(events[1].last_message);
  }

  #[test]
  fn decode_error_names_the_line() {
    let input = "\n{\"id\":\"1\",\"payload\":{\"kind\":\"fetch\"}}\n{not json\n";
    let mut reader = EventReader::new(Cursor::new(input));
    assert!(reader.next().unwrap().is_ok());
    match reader.next().unwrap() {
      Err(SummaryError::Decode { line, .. }) => assert_eq!(line, 3),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn unreadable_line_is_a_read_error() {
    let mut input = b"{\"id\":\"1\",\"payload\":{\"kind\":\"fetch\"}}\n".to_vec();
    input.extend_from_slice(&[0xff, 0xfe, b'\n']);
    let mut reader = EventReader::new(Cursor::new(input));
    assert!(reader.next().unwrap().is_ok());
    let err = reader.next().unwrap().unwrap_err();
    assert!(matches!(err, SummaryError::Read { line: 2, .. }));
    assert!(err.to_string().starts_with("failed to read build event: line 2"));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let err = summarize("/definitely/not/here.json", Config::default()).unwrap_err();
    assert!(matches!(err, SummaryError::Io { ref location, .. } if location == "/definitely/not/here.json"));
  }
}
