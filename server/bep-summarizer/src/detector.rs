//! Problem detection: an independent observer of the event stream.
//!
//! The detector sees every event before the summarizer does and classifies
//! failures into typed problems. It never fails mid-stream; anything it cannot
//! classify is logged and reported once, from `problems()`.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::Config;
use crate::error::DetectorError;
use crate::event::{self, AbortReason, BuildEvent, Payload, TestStatus};
use crate::fingerprint::problem_id;
use crate::types::*;

static LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?:@@?[\w.~+-]*)?//[\w./+-]*:[\w./+=,@~-]+").expect("label regex is valid")
});

/// Test output files that back a failing attempt.
const TEST_LOG: &str = "test.log";
const UNDECLARED_OUTPUTS: &[&str] = &["test.outputs__outputs.zip", "test.outputs"];

/// Anything that wants to classify problems from the same stream the summarizer folds.
pub trait ProblemDetector {
  /// Observe one event. Must not fail.
  fn process_bep_event(&mut self, event: &BuildEvent);

  /// Problems in detection order. Called once, after the last event.
  fn problems(&mut self) -> Result<Vec<Problem>, DetectorError>;
}

pub struct Detector {
  signatures: Vec<Regex>,
  /// Attempts seen so far, per test label, waiting for that label's summary.
  test_results: HashMap<String, Vec<ProblemTestResult>>,
  problems: Vec<Problem>,
  emitted: HashSet<String>,
  first_error: Option<DetectorError>,
}

impl Detector {
  pub fn new(config: &Config) -> Self {
    let signatures = config
      .progress_error_patterns
      .iter()
      .filter_map(|pattern| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
          tracing::warn!(pattern = %pattern, error = %e, "ignoring invalid progress error pattern");
          None
        }
      })
      .collect();
    Self {
      signatures,
      test_results: HashMap::new(),
      problems: Vec::new(),
      emitted: HashSet::new(),
      first_error: None,
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(&Config::default())
  }

  fn emit(&mut self, problem: Problem) {
    if self.emitted.insert(problem.id().to_string()) {
      tracing::debug!(id = problem.id(), label = problem.label(), "problem detected");
      self.problems.push(problem);
    }
  }

  fn record_error(&mut self, err: DetectorError) {
    tracing::warn!(error = %err, "problem detector could not classify event");
    if self.first_error.is_none() {
      self.first_error = Some(err);
    }
  }

  fn on_action(&mut self, action: &event::ActionExecuted) {
    if action.success {
      return;
    }
    let stdout = action.stdout.as_ref().and_then(BlobReference::from_file);
    let stderr = action.stderr.as_ref().and_then(BlobReference::from_file);
    if stdout.is_none() && stderr.is_none() {
      tracing::debug!(label = %action.label, "failed action without captured output");
      return;
    }
    let id = problem_id(
      "action",
      &[
        &action.label,
        &action.action_type,
        stdout.as_ref().map(|b| b.uri.as_str()).unwrap_or_default(),
        stderr.as_ref().map(|b| b.uri.as_str()).unwrap_or_default(),
      ],
    );
    self.emit(Problem::Action(ActionProblem {
      id,
      label: action.label.clone(),
      action_type: action.action_type.clone(),
      stdout,
      stderr,
    }));
  }

  fn on_progress(&mut self, progress: &event::Progress) {
    for chunk in [&progress.stdout, &progress.stderr] {
      if chunk.is_empty() || !self.signatures.iter().any(|re| re.is_match(chunk)) {
        continue;
      }
      let output = chunk.trim_end().to_string();
      let label = LABEL_REGEX
        .find(&output)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
      self.emit(Problem::Progress(ProgressProblem {
        id: problem_id("progress", &[&output]),
        label,
        output,
      }));
    }
  }

  fn on_target_completed(&mut self, completed: &event::TargetComplete) {
    let aborted = completed.aborted.as_ref();
    if completed.success && aborted.is_none() {
      return;
    }
    // Skipped targets (e.g. incompatible platforms) are not failures.
    if aborted.is_some_and(|a| a.reason == AbortReason::Skipped) {
      return;
    }
    if completed.label.is_empty() {
      self.record_error(DetectorError::UnlabeledFailure {
        kind: "target_completed",
      });
      return;
    }
    self.emit(Problem::Target(TargetProblem {
      id: problem_id("target", &[&completed.label]),
      label: completed.label.clone(),
    }));
  }

  fn on_test_result(&mut self, result: &event::TestResult) {
    if result.label.is_empty() {
      return;
    }
    let (run, shard, attempt) = (
      result.run.to_string(),
      result.shard.to_string(),
      result.attempt.to_string(),
    );
    let attempt_record = ProblemTestResult {
      id: problem_id("test_result", &[&result.label, &run, &shard, &attempt]),
      run: result.run,
      shard: result.shard,
      attempt: result.attempt,
      status: result.status,
      action_log_output: find_output(&result.test_action_output, &[TEST_LOG]),
      undeclared_test_outputs: find_output(&result.test_action_output, UNDECLARED_OUTPUTS),
    };
    self
      .test_results
      .entry(result.label.clone())
      .or_default()
      .push(attempt_record);
  }

  fn on_test_summary(&mut self, summary: &event::TestSummary) {
    if summary.overall_status == TestStatus::Passed {
      self.test_results.remove(&summary.label);
      return;
    }
    if summary.label.is_empty() {
      self.record_error(DetectorError::UnlabeledFailure { kind: "test_summary" });
      return;
    }
    let results = self.test_results.remove(&summary.label).unwrap_or_default();
    self.emit(Problem::Test(TestProblem {
      id: problem_id("test", &[&summary.label]),
      label: summary.label.clone(),
      status: summary.overall_status,
      results,
    }));
  }
}

impl ProblemDetector for Detector {
  fn process_bep_event(&mut self, event: &BuildEvent) {
    match &event.payload {
      Payload::ActionExecuted(action) => self.on_action(action),
      Payload::Progress(progress) => self.on_progress(progress),
      Payload::TargetCompleted(completed) => self.on_target_completed(completed),
      Payload::TestResult(result) => self.on_test_result(result),
      Payload::TestSummary(summary) => self.on_test_summary(summary),
      _ => {}
    }
  }

  fn problems(&mut self) -> Result<Vec<Problem>, DetectorError> {
    if let Some(err) = self.first_error.take() {
      return Err(err);
    }
    Ok(std::mem::take(&mut self.problems))
  }
}

fn find_output(files: &[event::File], names: &[&str]) -> Option<BlobReference> {
  names
    .iter()
    .find_map(|name| files.iter().find(|f| f.name == *name))
    .and_then(BlobReference::from_file)
}
