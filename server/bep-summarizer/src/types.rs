//! Output types: the invocation summary and everything hanging off it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

pub use crate::event::{AbortReason, MissReason, TestSize, TestStatus};

/// Bazel exit code for a successful build.
pub const EXIT_CODE_SUCCESS: i32 = 0;
/// Bazel exit code for an interrupted build.
pub const EXIT_CODE_INTERRUPTED: i32 = 8;

// ---------------------------------------------------------------------------
// Invocation summary (root aggregate)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct InvocationSummary {
  pub invocation_id: String,
  pub bazel_version: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ended_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exit_code: Option<ExitCode>,
  pub env_vars: BTreeMap<String, String>,
  pub command_line: BazelCommandLine,

  pub step_label: String,
  pub user_email: String,
  pub user_ldap: String,

  pub cpu: String,
  pub platform_name: String,
  pub configuration_mnemonic: String,
  pub num_fetches: i64,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub change_number: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub patchset_number: Option<i64>,
  pub build_url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_uuid: Option<Uuid>,

  pub targets: BTreeMap<String, TargetPair>,
  pub tests: BTreeMap<String, TestsCollection>,
  pub metrics: Metrics,
  pub problems: Vec<Problem>,
  pub event_file_url: String,
  pub related_files: BTreeMap<String, String>,
  pub build_logs: String,
  pub bep_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitCode {
  pub code: i32,
  pub name: String,
}

impl ExitCode {
  /// Success and user interruption both mean "nothing worth reporting".
  pub fn suppresses_problems(&self) -> bool {
    self.code == EXIT_CODE_SUCCESS || self.code == EXIT_CODE_INTERRUPTED
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BazelCommandLine {
  pub executable: String,
  pub command: String,
  pub residual: String,
  pub options: String,
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TargetPair {
  pub configuration: TargetConfiguration,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completion: Option<TargetCompletion>,
  pub duration_ms: i64,
  pub success: bool,
  pub target_kind: String,
  pub test_size: TestSize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetConfiguration {
  pub start_time_ms: i64,
  pub target_kind: String,
  pub test_size: TestSize,
  pub tag: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetCompletion {
  pub success: bool,
  pub end_time_ms: i64,
  pub tag: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub test_timeout_seconds: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub abort_reason: Option<AbortReason>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TestsCollection {
  pub test_summary: TestSummary,
  pub test_results: Vec<TestResult>,
  pub cached_locally: bool,
  pub cached_remotely: bool,
  pub strategy: String,
  pub overall_status: TestStatus,
  pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestSummary {
  pub label: String,
  pub status: TestStatus,
  pub attempt_count: i32,
  pub run_count: i32,
  pub shard_count: i32,
  pub total_run_count: i32,
  pub total_num_cached: i32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub first_start_time: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_stop_time: Option<DateTime<Utc>>,
  pub total_run_duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
  pub label: String,
  pub run: i32,
  pub shard: i32,
  pub attempt: i32,
  pub status: TestStatus,
  pub status_details: String,
  pub warning: Vec<String>,
  pub cached_locally: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub test_attempt_start: Option<DateTime<Utc>>,
  pub test_attempt_duration_ms: i64,
  pub execution_info: ExecutionInfo,
  pub test_action_output: Vec<TestFile>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionInfo {
  pub strategy: String,
  pub cached_remotely: bool,
  pub exit_code: i32,
  pub hostname: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timing_breakdown: Option<TimingBreakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingBreakdown {
  pub name: String,
  pub time_ms: i64,
  pub child: Vec<TimingChild>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingChild {
  pub name: String,
  pub time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFile {
  pub name: String,
  pub file: String,
  pub digest: String,
  pub length: i64,
  pub prefix: Vec<String>,
}

// ---------------------------------------------------------------------------
// Metrics snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
  pub action_summary: ActionSummary,
  pub memory_metrics: MemoryMetrics,
  pub target_metrics: TargetMetrics,
  pub package_metrics: PackageMetrics,
  pub timing_metrics: TimingMetrics,
  pub artifact_metrics: ArtifactMetrics,
  pub cumulative_metrics: CumulativeMetrics,
  pub network_metrics: NetworkMetrics,
  pub build_graph_metrics: BuildGraphMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionSummary {
  pub actions_created: i64,
  pub actions_created_not_including_aspects: i64,
  pub actions_executed: i64,
  pub action_data: Vec<ActionData>,
  pub runner_count: Vec<RunnerCount>,
  pub action_cache_statistics: ActionCacheStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionData {
  pub mnemonic: String,
  pub actions_executed: i64,
  pub first_started_ms: i64,
  pub last_ended_ms: i64,
  pub system_time_ms: i64,
  pub user_time_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunnerCount {
  pub name: String,
  pub count: i32,
  pub exec_kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionCacheStatistics {
  pub size_in_bytes: u64,
  pub save_time_in_ms: u64,
  pub hits: i32,
  pub misses: i32,
  pub miss_details: Vec<MissDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissDetail {
  pub reason: MissReason,
  pub count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryMetrics {
  pub used_heap_size_post_build: i64,
  pub peak_post_gc_heap_size: i64,
  pub peak_post_gc_tenured_space_heap_size: i64,
  pub garbage_metrics: Vec<GarbageMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GarbageMetrics {
  #[serde(rename = "type")]
  pub gc_type: String,
  pub garbage_collected: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TargetMetrics {
  pub targets_loaded: i64,
  pub targets_configured: i64,
  pub targets_configured_not_including_aspects: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackageMetrics {
  pub packages_loaded: i64,
  pub package_load_metrics: Vec<PackageLoadMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PackageLoadMetrics {
  pub name: String,
  pub load_duration_ms: i64,
  pub num_targets: u64,
  pub computation_steps: u64,
  pub num_transitive_loads: u64,
  pub package_overhead: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingMetrics {
  pub cpu_time_in_ms: i64,
  pub wall_time_in_ms: i64,
  pub analysis_phase_time_in_ms: i64,
  pub execution_phase_time_in_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilesMetric {
  pub size_in_bytes: i64,
  pub count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactMetrics {
  pub source_artifacts_read: FilesMetric,
  pub output_artifacts_seen: FilesMetric,
  pub output_artifacts_from_action_cache: FilesMetric,
  pub top_level_artifacts: FilesMetric,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CumulativeMetrics {
  pub num_analyses: i32,
  pub num_builds: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkMetrics {
  pub bytes_sent: u64,
  pub bytes_recv: u64,
  pub packets_sent: u64,
  pub packets_recv: u64,
  pub peak_bytes_sent_per_sec: u64,
  pub peak_bytes_recv_per_sec: u64,
  pub peak_packets_sent_per_sec: u64,
  pub peak_packets_recv_per_sec: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildGraphMetrics {
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

// ---------------------------------------------------------------------------
// Problems
// ---------------------------------------------------------------------------

/// Reference to a blob produced by the build (log file, test output, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobReference {
  pub name: String,
  pub uri: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub size_in_bytes: Option<i64>,
}

impl BlobReference {
  /// `None` when the file carries no URI to point at.
  pub fn from_file(file: &crate::event::File) -> Option<Self> {
    if file.uri.is_empty() {
      return None;
    }
    Some(Self {
      name: file.name.clone(),
      uri: blob_uri(&file.uri),
      size_in_bytes: (file.length > 0).then_some(file.length),
    })
  }
}

/// Normalized blob URI for a file URI reported by the build tool.
pub fn blob_uri(uri: &str) -> String {
  uri.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
  Action(ActionProblem),
  Progress(ProgressProblem),
  Target(TargetProblem),
  Test(TestProblem),
}

impl Problem {
  pub fn id(&self) -> &str {
    match self {
      Self::Action(p) => &p.id,
      Self::Progress(p) => &p.id,
      Self::Target(p) => &p.id,
      Self::Test(p) => &p.id,
    }
  }

  pub fn label(&self) -> &str {
    match self {
      Self::Action(p) => &p.label,
      Self::Progress(p) => &p.label,
      Self::Target(p) => &p.label,
      Self::Test(p) => &p.label,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionProblem {
  pub id: String,
  pub label: String,
  #[serde(rename = "type")]
  pub action_type: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stdout: Option<BlobReference>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stderr: Option<BlobReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressProblem {
  pub id: String,
  pub label: String,
  pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProblem {
  pub id: String,
  pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestProblem {
  pub id: String,
  pub label: String,
  pub status: TestStatus,
  pub results: Vec<ProblemTestResult>,
}

/// One attempt of a failing test, as surfaced on its problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemTestResult {
  pub id: String,
  pub run: i32,
  pub shard: i32,
  pub attempt: i32,
  pub status: TestStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub action_log_output: Option<BlobReference>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub undeclared_test_outputs: Option<BlobReference>,
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output written by the binary when summarization fails.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub event_id: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      event_id: None,
    }
  }

  pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
    self.event_id = Some(id.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::File;

  #[test]
  fn exit_code_suppression() {
    let code = |code| ExitCode {
      code,
      name: String::new(),
    };
    assert!(code(EXIT_CODE_SUCCESS).suppresses_problems());
    assert!(code(EXIT_CODE_INTERRUPTED).suppresses_problems());
    assert!(!code(1).suppresses_problems());
    assert!(!code(3).suppresses_problems());
  }

  #[test]
  fn blob_reference_requires_uri() {
    let file = File {
      name: "stderr".into(),
      ..File::default()
    };
    assert!(BlobReference::from_file(&file).is_none());

    let file = File {
      name: "stderr".into(),
      uri: " bytestream://cas/abc/12 ".into(),
      length: 12,
      ..File::default()
    };
    let blob = BlobReference::from_file(&file).unwrap();
    assert_eq!(blob.uri, "bytestream://cas/abc/12");
    assert_eq!(blob.size_in_bytes, Some(12));
  }

  #[test]
  fn problem_serializes_with_kind_tag() {
    let problem = Problem::Target(TargetProblem {
      id: "prb-1".into(),
      label: "//a:b".into(),
    });
    let json = serde_json::to_value(&problem).unwrap();
    assert_eq!(json["kind"], "target");
    assert_eq!(json["label"], "//a:b");
    assert_eq!(problem.id(), "prb-1");
  }
}
