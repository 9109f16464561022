//! Binary entrypoint: summarize one invocation's event stream.
//!
//! Reads JSON-lines events from the file named by the first argument, or from
//! stdin when none is given. Writes one line to stdout: the InvocationSummary,
//! or an ErrorOutput (exit status 1) when summarization fails.
//!
//! Logs go to stderr; set LOG_FORMAT=json for structured output and RUST_LOG
//! to change the level.

use bep_summarizer::types::ErrorOutput;
use bep_summarizer::{summarize, summarize_events, Config, EventReader, Summarizer, SummaryError};
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr);
  if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
    builder.json().init();
  } else {
    builder.init();
  }
}

fn main() {
  init_tracing();
  let config = Config::from_env();

  let result = match std::env::args().nth(1) {
    Some(path) => summarize(&path, config),
    None => {
      let stdin = io::stdin();
      summarize_events(Summarizer::new(config), EventReader::new(stdin.lock()))
    }
  };

  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());
  let code = match result {
    Ok((summary, completed)) => {
      if !completed {
        tracing::warn!("event stream ended before the last message");
      }
      tracing::info!(
        invocation_id = %summary.invocation_id,
        problems = summary.problems.len(),
        "summary complete"
      );
      let _ = serde_json::to_writer(&mut out, &summary);
      0
    }
    Err(e) => {
      tracing::error!(error = %e, "summarization failed");
      let err = match &e {
        SummaryError::Event { id, .. } => ErrorOutput::new(e.to_string()).with_event_id(id.clone()),
        _ => ErrorOutput::new(e.to_string()),
      };
      let _ = serde_json::to_writer(&mut out, &err);
      1
    }
  };
  let _ = writeln!(out);
  let _ = out.flush();
  drop(out);
  std::process::exit(code);
}
