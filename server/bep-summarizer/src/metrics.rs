//! Flatten the nested BuildMetrics message into the summary's Metrics snapshot.
//!
//! Every function here is pure. Absent sub-messages project to zero-valued
//! structures and durations become milliseconds; nothing can fail.

use crate::event::{
  ActionCacheStatisticsMsg, ActionSummaryMsg, ArtifactMetricsMsg, BuildGraphMetricsMsg, BuildMetrics,
  CumulativeMetricsMsg, FilesMetricMsg, MemoryMetricsMsg, NetworkMetricsMsg, PackageMetricsMsg,
  TargetMetricsMsg, TimingMetricsMsg,
};
use crate::types::*;

pub fn project(metrics: &BuildMetrics) -> Metrics {
  Metrics {
    action_summary: action_summary(metrics.action_summary.as_ref()),
    memory_metrics: memory_metrics(metrics.memory_metrics.as_ref()),
    target_metrics: target_metrics(metrics.target_metrics.as_ref()),
    package_metrics: package_metrics(metrics.package_metrics.as_ref()),
    timing_metrics: timing_metrics(metrics.timing_metrics.as_ref()),
    artifact_metrics: artifact_metrics(metrics.artifact_metrics.as_ref()),
    cumulative_metrics: cumulative_metrics(metrics.cumulative_metrics.as_ref()),
    network_metrics: network_metrics(metrics.network_metrics.as_ref()),
    build_graph_metrics: build_graph_metrics(metrics.build_graph_metrics.as_ref()),
  }
}

pub fn action_summary(msg: Option<&ActionSummaryMsg>) -> ActionSummary {
  let Some(msg) = msg else {
    return ActionSummary::default();
  };
  ActionSummary {
    actions_created: msg.actions_created,
    actions_created_not_including_aspects: msg.actions_created_not_including_aspects,
    actions_executed: msg.actions_executed,
    action_data: msg
      .action_data
      .iter()
      .map(|ad| ActionData {
        mnemonic: ad.mnemonic.clone(),
        actions_executed: ad.actions_executed,
        first_started_ms: ad.first_started_ms,
        last_ended_ms: ad.last_ended_ms,
        system_time_ms: ad.system_time.as_millis(),
        user_time_ms: ad.user_time.as_millis(),
      })
      .collect(),
    runner_count: msg
      .runner_count
      .iter()
      .map(|rc| RunnerCount {
        name: rc.name.clone(),
        count: rc.count,
        exec_kind: rc.exec_kind.clone(),
      })
      .collect(),
    action_cache_statistics: action_cache_statistics(msg.action_cache_statistics.as_ref()),
  }
}

fn action_cache_statistics(msg: Option<&ActionCacheStatisticsMsg>) -> ActionCacheStatistics {
  let Some(msg) = msg else {
    return ActionCacheStatistics::default();
  };
  ActionCacheStatistics {
    size_in_bytes: msg.size_in_bytes,
    save_time_in_ms: msg.save_time_in_ms,
    hits: msg.hits,
    misses: msg.misses,
    miss_details: msg
      .miss_details
      .iter()
      .map(|md| MissDetail {
        reason: md.reason,
        count: md.count,
      })
      .collect(),
  }
}

pub fn memory_metrics(msg: Option<&MemoryMetricsMsg>) -> MemoryMetrics {
  let Some(msg) = msg else {
    return MemoryMetrics::default();
  };
  MemoryMetrics {
    used_heap_size_post_build: msg.used_heap_size_post_build,
    peak_post_gc_heap_size: msg.peak_post_gc_heap_size,
    peak_post_gc_tenured_space_heap_size: msg.peak_post_gc_tenured_space_heap_size,
    garbage_metrics: msg
      .garbage_metrics
      .iter()
      .map(|gm| GarbageMetrics {
        gc_type: gm.gc_type.clone(),
        garbage_collected: gm.garbage_collected,
      })
      .collect(),
  }
}

pub fn target_metrics(msg: Option<&TargetMetricsMsg>) -> TargetMetrics {
  msg
    .map(|m| TargetMetrics {
      targets_loaded: m.targets_loaded,
      targets_configured: m.targets_configured,
      targets_configured_not_including_aspects: m.targets_configured_not_including_aspects,
    })
    .unwrap_or_default()
}

/// Package load entries carry all-optional fields; missing ones read as zero.
pub fn package_metrics(msg: Option<&PackageMetricsMsg>) -> PackageMetrics {
  let Some(msg) = msg else {
    return PackageMetrics::default();
  };
  PackageMetrics {
    packages_loaded: msg.packages_loaded,
    package_load_metrics: msg
      .package_load_metrics
      .iter()
      .map(|plm| PackageLoadMetrics {
        name: plm.name.clone().unwrap_or_default(),
        load_duration_ms: plm.load_duration.map(|d| d.as_millis()).unwrap_or_default(),
        num_targets: plm.num_targets.unwrap_or_default(),
        computation_steps: plm.computation_steps.unwrap_or_default(),
        num_transitive_loads: plm.num_transitive_loads.unwrap_or_default(),
        package_overhead: plm.package_overhead.unwrap_or_default(),
      })
      .collect(),
  }
}

pub fn timing_metrics(msg: Option<&TimingMetricsMsg>) -> TimingMetrics {
  msg
    .map(|m| TimingMetrics {
      cpu_time_in_ms: m.cpu_time_in_ms,
      wall_time_in_ms: m.wall_time_in_ms,
      analysis_phase_time_in_ms: m.analysis_phase_time_in_ms,
      execution_phase_time_in_ms: m.execution_phase_time_in_ms,
    })
    .unwrap_or_default()
}

pub fn artifact_metrics(msg: Option<&ArtifactMetricsMsg>) -> ArtifactMetrics {
  let Some(msg) = msg else {
    return ArtifactMetrics::default();
  };
  ArtifactMetrics {
    source_artifacts_read: files_metric(msg.source_artifacts_read.as_ref()),
    output_artifacts_seen: files_metric(msg.output_artifacts_seen.as_ref()),
    output_artifacts_from_action_cache: files_metric(msg.output_artifacts_from_action_cache.as_ref()),
    top_level_artifacts: files_metric(msg.top_level_artifacts.as_ref()),
  }
}

fn files_metric(msg: Option<&FilesMetricMsg>) -> FilesMetric {
  msg
    .map(|m| FilesMetric {
      size_in_bytes: m.size_in_bytes,
      count: m.count,
    })
    .unwrap_or_default()
}

pub fn cumulative_metrics(msg: Option<&CumulativeMetricsMsg>) -> CumulativeMetrics {
  msg
    .map(|m| CumulativeMetrics {
      num_analyses: m.num_analyses,
      num_builds: m.num_builds,
    })
    .unwrap_or_default()
}

/// The system stats sub-message is lifted one level up.
pub fn network_metrics(msg: Option<&NetworkMetricsMsg>) -> NetworkMetrics {
  let Some(stats) = msg.and_then(|m| m.system_network_stats.as_ref()) else {
    return NetworkMetrics::default();
  };
  NetworkMetrics {
    bytes_sent: stats.bytes_sent,
    bytes_recv: stats.bytes_recv,
    packets_sent: stats.packets_sent,
    packets_recv: stats.packets_recv,
    peak_bytes_sent_per_sec: stats.peak_bytes_sent_per_sec,
    peak_bytes_recv_per_sec: stats.peak_bytes_recv_per_sec,
    peak_packets_sent_per_sec: stats.peak_packets_sent_per_sec,
    peak_packets_recv_per_sec: stats.peak_packets_recv_per_sec,
  }
}

pub fn build_graph_metrics(msg: Option<&BuildGraphMetricsMsg>) -> BuildGraphMetrics {
  msg
    .map(|m| BuildGraphMetrics {
      action_lookup_value_count: m.action_lookup_value_count,
      action_lookup_value_count_not_including_aspects: m.action_lookup_value_count_not_including_aspects,
      action_count: m.action_count,
      action_count_not_including_aspects: m.action_count_not_including_aspects,
      input_file_configured_target_count: m.input_file_configured_target_count,
      output_file_configured_target_count: m.output_file_configured_target_count,
      other_configured_target_count: m.other_configured_target_count,
      output_artifact_count: m.output_artifact_count,
      post_invocation_skyframe_node_count: m.post_invocation_skyframe_node_count,
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::{
    ActionDataMsg, MissDetailMsg, MissReason, PackageLoadMetricsMsg, ProtoDuration, RunnerCountMsg,
    SystemNetworkStatsMsg,
  };

  #[test]
  fn empty_message_projects_to_zero_snapshot() {
    assert_eq!(project(&BuildMetrics::default()), Metrics::default());
  }

  #[test]
  fn action_summary_converts_durations() {
    let msg = ActionSummaryMsg {
      actions_created: 120,
      actions_created_not_including_aspects: 100,
      actions_executed: 40,
      action_data: vec![ActionDataMsg {
        mnemonic: "GoCompile".into(),
        actions_executed: 12,
        first_started_ms: 1_000,
        last_ended_ms: 9_000,
        system_time: ProtoDuration::from_millis(1_500),
        user_time: ProtoDuration {
          seconds: 3,
          nanos: 250_000_000,
        },
      }],
      runner_count: vec![RunnerCountMsg {
        name: "remote".into(),
        count: 30,
        exec_kind: "Remote".into(),
      }],
      action_cache_statistics: Some(ActionCacheStatisticsMsg {
        hits: 7,
        misses: 3,
        miss_details: vec![MissDetailMsg {
          reason: MissReason::DifferentFiles,
          count: 3,
        }],
        ..ActionCacheStatisticsMsg::default()
      }),
    };

    let out = action_summary(Some(&msg));
    assert_eq!(out.actions_created, 120);
    assert_eq!(out.action_data[0].system_time_ms, 1_500);
    assert_eq!(out.action_data[0].user_time_ms, 3_250);
    assert_eq!(out.runner_count[0].exec_kind, "Remote");
    assert_eq!(out.action_cache_statistics.hits, 7);
    assert_eq!(out.action_cache_statistics.miss_details[0].reason, MissReason::DifferentFiles);
  }

  #[test]
  fn action_summary_without_cache_statistics() {
    let out = action_summary(Some(&ActionSummaryMsg::default()));
    assert_eq!(out.action_cache_statistics, ActionCacheStatistics::default());
  }

  #[test]
  fn package_load_missing_fields_read_as_zero() {
    let msg = PackageMetricsMsg {
      packages_loaded: 2,
      package_load_metrics: vec![
        PackageLoadMetricsMsg {
          name: Some("//pkg".into()),
          load_duration: Some(ProtoDuration::from_millis(42)),
          num_targets: Some(5),
          ..PackageLoadMetricsMsg::default()
        },
        PackageLoadMetricsMsg::default(),
      ],
    };
    let out = package_metrics(Some(&msg));
    assert_eq!(out.packages_loaded, 2);
    assert_eq!(out.package_load_metrics[0].name, "//pkg");
    assert_eq!(out.package_load_metrics[0].load_duration_ms, 42);
    assert_eq!(out.package_load_metrics[0].num_targets, 5);
    assert_eq!(out.package_load_metrics[1], PackageLoadMetrics::default());
  }

  #[test]
  fn network_stats_are_lifted() {
    let msg = NetworkMetricsMsg {
      system_network_stats: Some(SystemNetworkStatsMsg {
        bytes_sent: 10,
        bytes_recv: 20,
        peak_packets_recv_per_sec: 3,
        ..SystemNetworkStatsMsg::default()
      }),
    };
    let out = network_metrics(Some(&msg));
    assert_eq!(out.bytes_sent, 10);
    assert_eq!(out.bytes_recv, 20);
    assert_eq!(out.peak_packets_recv_per_sec, 3);

    let empty = network_metrics(Some(&NetworkMetricsMsg::default()));
    assert_eq!(empty, NetworkMetrics::default());
  }

  #[test]
  fn artifact_metrics_partial() {
    let msg = ArtifactMetricsMsg {
      top_level_artifacts: Some(FilesMetricMsg {
        size_in_bytes: 2048,
        count: 4,
      }),
      ..ArtifactMetricsMsg::default()
    };
    let out = artifact_metrics(Some(&msg));
    assert_eq!(out.top_level_artifacts.count, 4);
    assert_eq!(out.source_artifacts_read, FilesMetric::default());
  }
}
