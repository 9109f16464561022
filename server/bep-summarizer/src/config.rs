//! Summarizer configuration with sane defaults, overridable from the environment.

/// What to do when the event stream breaks a protocol ordering rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViolationPolicy {
  /// Fail the whole summarization with the offending event's id.
  #[default]
  Abort,
  /// Log the violation, skip the event, keep folding the rest of the stream.
  LogAndContinue,
}

impl ViolationPolicy {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "abort" | "fail" => Some(Self::Abort),
      "continue" | "log" | "log_and_continue" => Some(Self::LogAndContinue),
      _ => None,
    }
  }
}

/// Default error signatures for progress output (Bazel's console format).
pub const DEFAULT_PROGRESS_ERROR_PATTERNS: &[&str] = &[
  r"(?m)^ERROR: ",
  r"(?m)^FAILED: Build did NOT complete successfully",
  r"(?m)^Target \S+ failed to build",
];

#[derive(Debug, Clone)]
pub struct Config {
  pub on_protocol_violation: ViolationPolicy,
  /// Regexes matched against each progress chunk; a hit yields a progress problem.
  pub progress_error_patterns: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      on_protocol_violation: ViolationPolicy::Abort,
      progress_error_patterns: DEFAULT_PROGRESS_ERROR_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect(),
    }
  }
}

impl Config {
  /// Defaults, overridden by `BEP_ON_PROTOCOL_VIOLATION` and
  /// `BEP_PROGRESS_ERROR_PATTERNS` (semicolon-separated) when set.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(raw) = std::env::var("BEP_ON_PROTOCOL_VIOLATION") {
      match ViolationPolicy::from_str_loose(&raw) {
        Some(policy) => config.on_protocol_violation = policy,
        None => tracing::warn!(value = %raw, "unknown BEP_ON_PROTOCOL_VIOLATION, keeping abort"),
      }
    }

    if let Ok(raw) = std::env::var("BEP_PROGRESS_ERROR_PATTERNS") {
      let patterns: Vec<String> = raw
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
      if !patterns.is_empty() {
        config.progress_error_patterns = patterns;
      }
    }

    config
  }
}
