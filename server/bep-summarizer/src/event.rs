//! Decoded Build Event Protocol events (input contract).
//!
//! The wire decoder lives outside this crate; these types describe the shape it
//! hands over, one JSON object per event. Every sub-message is lenient: absent
//! fields take their zero value and unknown fields are silently ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One event of the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildEvent {
  /// Opaque event id as rendered by the decoder; used in error messages.
  #[serde(default)]
  pub id: String,
  /// Set on the final event the build tool emits for the invocation.
  #[serde(default)]
  pub last_message: bool,
  pub payload: Payload,
}

impl BuildEvent {
  pub fn new(id: impl Into<String>, payload: Payload) -> Self {
    Self {
      id: id.into(),
      last_message: false,
      payload,
    }
  }

  pub fn last(mut self) -> Self {
    self.last_message = true;
    self
  }

  /// Id used when reporting errors; falls back to the event kind.
  pub fn display_id(&self) -> &str {
    if self.id.is_empty() {
      self.payload.kind()
    } else {
      &self.id
    }
  }
}

/// Event body, tagged by `kind`. Kinds this crate does not know decode to `Unknown`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
  Started(BuildStarted),
  BuildMetadata(BuildMetadata),
  BuildFinished(BuildFinished),
  BuildMetrics(BuildMetrics),
  StructuredCommandLine(CommandLine),
  Configuration(Configuration),
  TargetConfigured(TargetConfigured),
  TargetCompleted(TargetComplete),
  Fetch(Fetch),
  ActionExecuted(ActionExecuted),
  TestResult(TestResult),
  TestSummary(TestSummary),
  OptionsParsed(OptionsParsed),
  BuildToolLogs(BuildToolLogs),
  Progress(Progress),
  #[serde(other)]
  Unknown,
}

impl Payload {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Started(_) => "started",
      Self::BuildMetadata(_) => "build_metadata",
      Self::BuildFinished(_) => "build_finished",
      Self::BuildMetrics(_) => "build_metrics",
      Self::StructuredCommandLine(_) => "structured_command_line",
      Self::Configuration(_) => "configuration",
      Self::TargetConfigured(_) => "target_configured",
      Self::TargetCompleted(_) => "target_completed",
      Self::Fetch(_) => "fetch",
      Self::ActionExecuted(_) => "action_executed",
      Self::TestResult(_) => "test_result",
      Self::TestSummary(_) => "test_summary",
      Self::OptionsParsed(_) => "options_parsed",
      Self::BuildToolLogs(_) => "build_tool_logs",
      Self::Progress(_) => "progress",
      Self::Unknown => "unknown",
    }
  }
}

// ---------------------------------------------------------------------------
// Shared wire primitives
// ---------------------------------------------------------------------------

/// Protobuf-style duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProtoDuration {
  pub seconds: i64,
  pub nanos: i32,
}

impl ProtoDuration {
  pub fn from_millis(ms: i64) -> Self {
    Self {
      seconds: ms / 1000,
      nanos: ((ms % 1000) * 1_000_000) as i32,
    }
  }

  pub fn as_millis(&self) -> i64 {
    self.seconds * 1000 + i64::from(self.nanos) / 1_000_000
  }
}

/// A file reference emitted by the build tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct File {
  pub name: String,
  pub uri: String,
  pub path_prefix: Vec<String>,
  pub digest: String,
  pub length: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
  #[default]
  NoStatus,
  Passed,
  Flaky,
  Timeout,
  Failed,
  Incomplete,
  RemoteFailure,
  FailedToBuild,
  ToolHaltedBeforeTesting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestSize {
  #[default]
  Unknown,
  Small,
  Medium,
  Large,
  Enormous,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
  #[default]
  Unknown,
  UserInterrupted,
  NoAnalyze,
  NoBuild,
  TimeOut,
  RemoteEnvironmentFailure,
  Internal,
  LoadingFailure,
  AnalysisFailure,
  Skipped,
  Incomplete,
  OutOfMemory,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildStarted {
  pub uuid: String,
  pub start_time: Option<DateTime<Utc>>,
  /// Legacy field, used only when `start_time` is absent.
  pub start_time_millis: i64,
  pub build_tool_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildMetadata {
  pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireExitCode {
  pub name: String,
  pub code: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildFinished {
  pub exit_code: Option<WireExitCode>,
  pub finish_time: Option<DateTime<Utc>>,
  /// Legacy field, used only when `finish_time` is absent.
  pub finish_time_millis: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
  pub mnemonic: String,
  pub platform_name: String,
  pub cpu: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fetch {
  pub url: String,
  pub success: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionsParsed {
  pub explicit_cmd_line: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildToolLogs {
  pub log: Vec<File>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Progress {
  pub stdout: String,
  pub stderr: String,
}

// ---------------------------------------------------------------------------
// Structured command line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandLine {
  pub command_line_label: String,
  pub sections: Vec<CommandLineSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandLineSection {
  pub section_label: String,
  pub chunk_list: Option<ChunkList>,
  pub option_list: Option<OptionList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkList {
  pub chunk: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionList {
  pub option: Vec<CommandOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandOption {
  pub combined_form: String,
  pub option_name: String,
  pub option_value: String,
}

// ---------------------------------------------------------------------------
// Targets and actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetConfigured {
  pub label: String,
  pub target_kind: String,
  pub test_size: TestSize,
  pub tag: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Aborted {
  pub reason: AbortReason,
}

/// Completion of a target. When the build tool aborted the target, `aborted` is
/// set and the remaining fields are zero.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetComplete {
  pub label: String,
  pub success: bool,
  pub tag: Vec<String>,
  pub test_timeout: Option<ProtoDuration>,
  pub aborted: Option<Aborted>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionExecuted {
  pub label: String,
  pub success: bool,
  #[serde(rename = "type")]
  pub action_type: String,
  pub stdout: Option<File>,
  pub stderr: Option<File>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingBreakdown {
  pub name: String,
  pub time: ProtoDuration,
  pub child: Vec<TimingBreakdown>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutionInfo {
  pub strategy: String,
  pub cached_remotely: bool,
  pub exit_code: i32,
  pub hostname: String,
  pub timing_breakdown: Option<TimingBreakdown>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestResult {
  pub label: String,
  pub run: i32,
  pub shard: i32,
  pub attempt: i32,
  pub status: TestStatus,
  pub status_details: String,
  pub cached_locally: bool,
  pub warning: Vec<String>,
  pub test_attempt_start: Option<DateTime<Utc>>,
  pub test_attempt_duration: ProtoDuration,
  pub execution_info: Option<ExecutionInfo>,
  pub test_action_output: Vec<File>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestSummary {
  pub label: String,
  pub overall_status: TestStatus,
  pub total_run_count: i32,
  pub run_count: i32,
  pub attempt_count: i32,
  pub shard_count: i32,
  pub total_num_cached: i32,
  pub first_start_time: Option<DateTime<Utc>>,
  pub last_stop_time: Option<DateTime<Utc>>,
  pub total_run_duration: ProtoDuration,
}

// ---------------------------------------------------------------------------
// Build metrics (nested, as emitted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildMetrics {
  pub action_summary: Option<ActionSummaryMsg>,
  pub memory_metrics: Option<MemoryMetricsMsg>,
  pub target_metrics: Option<TargetMetricsMsg>,
  pub package_metrics: Option<PackageMetricsMsg>,
  pub timing_metrics: Option<TimingMetricsMsg>,
  pub artifact_metrics: Option<ArtifactMetricsMsg>,
  pub cumulative_metrics: Option<CumulativeMetricsMsg>,
  pub network_metrics: Option<NetworkMetricsMsg>,
  pub build_graph_metrics: Option<BuildGraphMetricsMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionSummaryMsg {
  pub actions_created: i64,
  pub actions_created_not_including_aspects: i64,
  pub actions_executed: i64,
  pub action_data: Vec<ActionDataMsg>,
  pub runner_count: Vec<RunnerCountMsg>,
  pub action_cache_statistics: Option<ActionCacheStatisticsMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionDataMsg {
  pub mnemonic: String,
  pub actions_executed: i64,
  pub first_started_ms: i64,
  pub last_ended_ms: i64,
  pub system_time: ProtoDuration,
  pub user_time: ProtoDuration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnerCountMsg {
  pub name: String,
  pub count: i32,
  pub exec_kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionCacheStatisticsMsg {
  pub size_in_bytes: u64,
  pub save_time_in_ms: u64,
  pub hits: i32,
  pub misses: i32,
  pub miss_details: Vec<MissDetailMsg>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissReason {
  #[default]
  DifferentActionKey,
  DifferentDeps,
  DifferentEnvironment,
  DifferentFiles,
  CorruptedCacheEntry,
  NotCached,
  UnconditionalExecution,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MissDetailMsg {
  pub reason: MissReason,
  pub count: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryMetricsMsg {
  pub used_heap_size_post_build: i64,
  pub peak_post_gc_heap_size: i64,
  pub peak_post_gc_tenured_space_heap_size: i64,
  pub garbage_metrics: Vec<GarbageMetricsMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GarbageMetricsMsg {
  #[serde(rename = "type")]
  pub gc_type: String,
  pub garbage_collected: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetMetricsMsg {
  pub targets_loaded: i64,
  pub targets_configured: i64,
  pub targets_configured_not_including_aspects: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PackageMetricsMsg {
  pub packages_loaded: i64,
  pub package_load_metrics: Vec<PackageLoadMetricsMsg>,
}

/// Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PackageLoadMetricsMsg {
  pub name: Option<String>,
  pub load_duration: Option<ProtoDuration>,
  pub num_targets: Option<u64>,
  pub computation_steps: Option<u64>,
  pub num_transitive_loads: Option<u64>,
  pub package_overhead: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingMetricsMsg {
  pub cpu_time_in_ms: i64,
  pub wall_time_in_ms: i64,
  pub analysis_phase_time_in_ms: i64,
  pub execution_phase_time_in_ms: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilesMetricMsg {
  pub size_in_bytes: i64,
  pub count: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArtifactMetricsMsg {
  pub source_artifacts_read: Option<FilesMetricMsg>,
  pub output_artifacts_seen: Option<FilesMetricMsg>,
  pub output_artifacts_from_action_cache: Option<FilesMetricMsg>,
  pub top_level_artifacts: Option<FilesMetricMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CumulativeMetricsMsg {
  pub num_analyses: i32,
  pub num_builds: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkMetricsMsg {
  pub system_network_stats: Option<SystemNetworkStatsMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemNetworkStatsMsg {
  pub bytes_sent: u64,
  pub bytes_recv: u64,
  pub packets_sent: u64,
  pub packets_recv: u64,
  pub peak_bytes_sent_per_sec: u64,
  pub peak_bytes_recv_per_sec: u64,
  pub peak_packets_sent_per_sec: u64,
  pub peak_packets_recv_per_sec: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildGraphMetricsMsg {
  pub action_lookup_value_count: i32,
  pub action_lookup_value_count_not_including_aspects: i32,
  pub action_count: i32,
  pub action_count_not_including_aspects: i32,
  pub input_file_configured_target_count: i32,
  pub output_file_configured_target_count: i32,
  pub other_configured_target_count: i32,
  pub output_artifact_count: i32,
  pub post_invocation_skyframe_node_count: i32,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_kind_decodes_to_unknown() {
    let json = r#"{"id":"x","payload":{"kind":"workspace_status","item":[1,2]}}"#;
    let event: BuildEvent = serde_json::from_str(json).unwrap();
    assert!(matches!(event.payload, Payload::Unknown));
    assert!(!event.last_message);
  }

  #[test]
  fn target_completed_decodes_abort() {
    let json = r#"{
      "id": "tc-1",
      "last_message": true,
      "payload": {"kind": "target_completed", "label": "//a:b", "aborted": {"reason": "SKIPPED"}}
    }"#;
    let event: BuildEvent = serde_json::from_str(json).unwrap();
    assert!(event.last_message);
    match event.payload {
      Payload::TargetCompleted(tc) => {
        assert_eq!(tc.label, "//a:b");
        assert!(!tc.success);
        assert_eq!(tc.aborted.unwrap().reason, AbortReason::Skipped);
      }
      other => panic!("unexpected payload {:?}", other),
    }
  }

  #[test]
  fn fields_not_modelled_are_ignored() {
    let json = r#"{"id":"a-1","payload":{"kind":"action_executed","label":"//a:b","success":false,
      "type":"CppCompile","exit_code":1,"primary_output":{"name":"b.o","uri":"file:///out/b.o"},
      "command_line":["gcc","-c","b.cc"],"stderr":{"name":"stderr","uri":"bytestream://cas/e/3"}}}"#;
    let event: BuildEvent = serde_json::from_str(json).unwrap();
    match event.payload {
      Payload::ActionExecuted(action) => {
        assert_eq!(action.action_type, "CppCompile");
        assert!(action.stdout.is_none());
        assert_eq!(action.stderr.unwrap().uri, "bytestream://cas/e/3");
      }
      other => panic!("unexpected payload {:?}", other),
    }

    let json = r#"{"payload":{"kind":"build_finished","overall_success":true,"exit_code":{"name":"SUCCESS","code":0}}}"#;
    let event: BuildEvent = serde_json::from_str(json).unwrap();
    assert!(matches!(event.payload, Payload::BuildFinished(ref f) if f.exit_code.as_ref().is_some_and(|c| c.name == "SUCCESS")));
  }

  #[test]
  fn display_id_falls_back_to_kind() {
    let event = BuildEvent::new("", Payload::Fetch(Fetch::default()));
    assert_eq!(event.display_id(), "fetch");
    let event = BuildEvent::new("fetch-7", Payload::Fetch(Fetch::default()));
    assert_eq!(event.display_id(), "fetch-7");
  }

  #[test]
  fn proto_duration_millis() {
    let d = ProtoDuration {
      seconds: 2,
      nanos: 500_000_000,
    };
    assert_eq!(d.as_millis(), 2500);
    assert_eq!(ProtoDuration::from_millis(1250).as_millis(), 1250);
  }
}
