//! The summarizer: folds one invocation's event stream into an InvocationSummary.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::command_line;
use crate::config::{Config, ViolationPolicy};
use crate::detector::{Detector, ProblemDetector};
use crate::error::SummaryError;
use crate::event::{self, BuildEvent, Payload};
use crate::metrics;
use crate::rollup::Rollup;
use crate::types::*;

pub const STEP_LABEL_KEY: &str = "BUILD_STEP_LABEL";
pub const USER_EMAIL_KEY: &str = "user_email";
pub const USER_LDAP_KEY: &str = "user_ldap";

/// Source of wall-clock time for target configuration/completion stamps.
pub type Clock = Box<dyn FnMut() -> DateTime<Utc>>;

/// Holds the running summary and the detector observing the same stream.
pub struct Summarizer<D = Detector> {
  config: Config,
  summary: InvocationSummary,
  detector: D,
  clock: Clock,
}

impl Summarizer<Detector> {
  pub fn new(config: Config) -> Self {
    let detector = Detector::new(&config);
    Self::with_detector(config, detector)
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }
}

impl<D: ProblemDetector> Summarizer<D> {
  pub fn with_detector(config: Config, detector: D) -> Self {
    Self {
      config,
      summary: InvocationSummary::default(),
      detector,
      clock: Box::new(Utc::now),
    }
  }

  pub fn with_clock(mut self, clock: impl FnMut() -> DateTime<Utc> + 'static) -> Self {
    self.clock = Box::new(clock);
    self
  }

  /// Record where the events came from; the file itself becomes a related file.
  pub fn with_event_file(mut self, url: &str) -> Self {
    self.summary.event_file_url = url.to_string();
    if !url.is_empty() {
      let name = Path::new(url)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(url);
      self.summary.related_files.insert(name.to_string(), url.to_string());
    }
    self
  }

  /// The summary as folded so far.
  pub fn summary(&self) -> &InvocationSummary {
    &self.summary
  }

  /// Process one event, in stream order.
  ///
  /// The detector observes the event first; then it is dispatched by kind.
  /// Protocol violations are returned or logged according to the configured policy.
  pub fn process_event(&mut self, event: &BuildEvent) -> Result<(), SummaryError> {
    self.detector.process_bep_event(event);

    match self.dispatch(event) {
      Ok(()) => {}
      Err(e)
        if e.is_protocol_violation()
          && self.config.on_protocol_violation == ViolationPolicy::LogAndContinue =>
      {
        tracing::warn!(event_id = event.display_id(), error = %e, "skipping event");
      }
      Err(e) => return Err(e),
    }

    self.summary.bep_completed = event.last_message;
    Ok(())
  }

  fn dispatch(&mut self, event: &BuildEvent) -> Result<(), SummaryError> {
    match &event.payload {
      Payload::Started(started) => self.handle_started(started),
      Payload::BuildMetadata(metadata) => self.handle_build_metadata(metadata),
      Payload::BuildFinished(finished) => self.handle_build_finished(finished),
      Payload::BuildMetrics(build_metrics) => {
        self.summary.metrics = metrics::project(build_metrics);
      }
      Payload::StructuredCommandLine(cl) => command_line::apply(&mut self.summary, cl)?,
      Payload::Configuration(configuration) => self.handle_configuration(configuration),
      Payload::TargetConfigured(configured) => self.handle_target_configured(configured)?,
      Payload::TargetCompleted(completed) => self.handle_target_completed(completed)?,
      Payload::Fetch(fetch) => {
        if fetch.success {
          self.summary.num_fetches += 1;
        }
      }
      Payload::TestResult(result) => self.handle_test_result(result)?,
      Payload::TestSummary(test_summary) => self.handle_test_summary(test_summary)?,
      Payload::OptionsParsed(options) => {
        self.summary.command_line.options = options.explicit_cmd_line.join(" ");
      }
      Payload::BuildToolLogs(logs) => self.handle_build_tool_logs(logs),
      Payload::Progress(progress) => {
        self.summary.build_logs.push_str(&progress.stdout);
        self.summary.build_logs.push_str(&progress.stderr);
      }
      Payload::ActionExecuted(_) => {}
      Payload::Unknown => {
        tracing::trace!(event_id = event.display_id(), "ignoring unknown event kind");
      }
    }
    Ok(())
  }

  fn handle_started(&mut self, started: &event::BuildStarted) {
    self.summary.started_at = started
      .start_time
      .or_else(|| DateTime::from_timestamp_millis(started.start_time_millis));
    self.summary.invocation_id = started.uuid.clone();
    self.summary.bazel_version = started.build_tool_version.clone();
  }

  fn handle_build_metadata(&mut self, metadata: &event::BuildMetadata) {
    let lookup = |key: &str| match metadata.metadata.get(key) {
      Some(value) => value.clone(),
      None => {
        tracing::debug!(key, "no value found in build metadata");
        String::new()
      }
    };
    self.summary.step_label = lookup(STEP_LABEL_KEY);
    self.summary.user_email = lookup(USER_EMAIL_KEY);
    self.summary.user_ldap = lookup(USER_LDAP_KEY);
  }

  fn handle_build_finished(&mut self, finished: &event::BuildFinished) {
    self.summary.ended_at = finished
      .finish_time
      .or_else(|| DateTime::from_timestamp_millis(finished.finish_time_millis));
    let exit_code = finished.exit_code.clone().unwrap_or_default();
    self.summary.exit_code = Some(ExitCode {
      code: exit_code.code,
      name: exit_code.name,
    });
  }

  fn handle_configuration(&mut self, configuration: &event::Configuration) {
    self.summary.cpu = configuration.cpu.clone();
    self.summary.platform_name = configuration.platform_name.clone();
    self.summary.configuration_mnemonic = configuration.mnemonic.clone();
  }

  fn handle_target_configured(&mut self, configured: &event::TargetConfigured) -> Result<(), SummaryError> {
    if configured.label.is_empty() {
      return Err(SummaryError::protocol("target_configured", "missing target label"));
    }
    let start_time_ms = (self.clock)().timestamp_millis();
    self.summary.targets.insert(
      configured.label.clone(),
      TargetPair {
        configuration: TargetConfiguration {
          start_time_ms,
          target_kind: configured.target_kind.clone(),
          test_size: configured.test_size,
          tag: configured.tag.clone(),
        },
        completion: None,
        duration_ms: 0,
        // Flipped by the completion event.
        success: false,
        target_kind: configured.target_kind.clone(),
        test_size: configured.test_size,
      },
    );
    Ok(())
  }

  fn handle_target_completed(&mut self, completed: &event::TargetComplete) -> Result<(), SummaryError> {
    if completed.label.is_empty() {
      return Err(SummaryError::protocol("target_completed", "missing target label"));
    }
    let end_time_ms = (self.clock)().timestamp_millis();
    let Some(pair) = self.summary.targets.get_mut(&completed.label) else {
      return Err(SummaryError::protocol(
        "target_completed",
        format!("label {} completed before it was configured", completed.label),
      ));
    };

    let completion = match &completed.aborted {
      Some(aborted) => TargetCompletion {
        success: false,
        end_time_ms,
        tag: Vec::new(),
        test_timeout_seconds: None,
        abort_reason: Some(aborted.reason),
      },
      None => TargetCompletion {
        success: completed.success,
        end_time_ms,
        tag: completed.tag.clone(),
        test_timeout_seconds: completed.test_timeout.map(|d| d.seconds),
        abort_reason: None,
      },
    };

    pair.duration_ms = completion.end_time_ms - pair.configuration.start_time_ms;
    pair.success = completion.success;
    pair.completion = Some(completion);
    Ok(())
  }

  fn handle_test_result(&mut self, result: &event::TestResult) -> Result<(), SummaryError> {
    if result.label.is_empty() {
      return Err(SummaryError::protocol("test_result", "missing test label"));
    }
    let record = test_result(result);
    let collection = self
      .summary
      .tests
      .entry(result.label.clone())
      .or_insert_with(new_collection);
    Rollup::of(collection).fold(&record).apply_to(collection);
    collection.test_results.push(record);
    Ok(())
  }

  fn handle_test_summary(&mut self, wire: &event::TestSummary) -> Result<(), SummaryError> {
    if wire.label.is_empty() {
      return Err(SummaryError::protocol("test_summary", "missing test label"));
    }
    let Some(collection) = self.summary.tests.get_mut(&wire.label) else {
      return Err(SummaryError::protocol(
        "test_summary",
        format!("summary for {} arrived before any test result", wire.label),
      ));
    };

    collection.test_summary = TestSummary {
      label: wire.label.clone(),
      status: wire.overall_status,
      attempt_count: wire.attempt_count,
      run_count: wire.run_count,
      shard_count: wire.shard_count,
      total_run_count: wire.total_run_count,
      total_num_cached: wire.total_num_cached,
      first_start_time: wire.first_start_time,
      last_stop_time: wire.last_stop_time,
      total_run_duration_ms: wire.total_run_duration.as_millis(),
    };
    collection.overall_status = wire.overall_status;
    collection.duration_ms = collection.test_summary.total_run_duration_ms;
    Ok(())
  }

  fn handle_build_tool_logs(&mut self, logs: &event::BuildToolLogs) {
    for log in logs.log.iter().filter(|l| !l.uri.is_empty()) {
      self.summary.related_files.insert(log.name.clone(), blob_uri(&log.uri));
    }
  }

  /// Merge detector output and freeze the summary.
  ///
  /// Returns the summary and the stream's final "last message" flag. Problems
  /// are dropped entirely when the build succeeded or was interrupted.
  pub fn finish(mut self) -> Result<(InvocationSummary, bool), SummaryError> {
    let detected = self.detector.problems();
    let suppress = self
      .summary
      .exit_code
      .as_ref()
      .is_some_and(ExitCode::suppresses_problems);

    if suppress {
      match detected {
        Ok(problems) if !problems.is_empty() => {
          tracing::debug!(count = problems.len(), "discarding problems for clean exit");
        }
        Err(e) => tracing::debug!(error = %e, "discarding detector error for clean exit"),
        Ok(_) => {}
      }
    } else {
      self.summary.problems.extend(detected?);
    }

    let completed = self.summary.bep_completed;
    Ok((self.summary, completed))
  }
}

/// Drive a summarizer over a pull-based event source, then finalize.
///
/// Source errors are returned as they are; handler errors carry the id of the
/// event that caused them. The first error ends the pass.
pub fn summarize_events<D, I>(mut summarizer: Summarizer<D>, events: I) -> Result<(InvocationSummary, bool), SummaryError>
where
  D: ProblemDetector,
  I: IntoIterator<Item = Result<BuildEvent, SummaryError>>,
{
  for event in events {
    let event = event?;
    summarizer
      .process_event(&event)
      .map_err(|e| SummaryError::in_event(event.display_id(), e))?;
  }
  summarizer.finish()
}

fn new_collection() -> TestsCollection {
  let initial = Rollup::default();
  TestsCollection {
    test_summary: TestSummary::default(),
    test_results: Vec::new(),
    cached_locally: initial.cached_locally,
    cached_remotely: initial.cached_remotely,
    strategy: initial.strategy,
    overall_status: TestStatus::NoStatus,
    duration_ms: 0,
  }
}

fn test_result(wire: &event::TestResult) -> TestResult {
  TestResult {
    label: wire.label.clone(),
    run: wire.run,
    shard: wire.shard,
    attempt: wire.attempt,
    status: wire.status,
    status_details: wire.status_details.clone(),
    warning: wire.warning.clone(),
    cached_locally: wire.cached_locally,
    test_attempt_start: wire.test_attempt_start,
    test_attempt_duration_ms: wire.test_attempt_duration.as_millis(),
    execution_info: wire.execution_info.as_ref().map(execution_info).unwrap_or_default(),
    test_action_output: wire
      .test_action_output
      .iter()
      .map(|f| TestFile {
        name: f.name.clone(),
        file: f.uri.clone(),
        digest: f.digest.clone(),
        length: f.length,
        prefix: f.path_prefix.clone(),
      })
      .collect(),
  }
}

fn execution_info(wire: &event::ExecutionInfo) -> ExecutionInfo {
  ExecutionInfo {
    strategy: wire.strategy.clone(),
    cached_remotely: wire.cached_remotely,
    exit_code: wire.exit_code,
    hostname: wire.hostname.clone(),
    timing_breakdown: wire.timing_breakdown.as_ref().map(|tb| TimingBreakdown {
      name: tb.name.clone(),
      time_ms: tb.time.as_millis(),
      child: tb
        .child
        .iter()
        .map(|c| TimingChild {
          name: c.name.clone(),
          time_ms: c.time.as_millis(),
        })
        .collect(),
    }),
  }
}
