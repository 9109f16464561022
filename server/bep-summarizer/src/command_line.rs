//! Structured command line: env vars, command sections, and the CI variables
//! lifted out of them.

use std::collections::BTreeMap;

use base64::Engine as _;

use crate::error::SummaryError;
use crate::event::{CommandLine, CommandLineSection};
use crate::fingerprint;
use crate::types::InvocationSummary;

/// Only the command line exactly as the user typed it is summarized.
pub const ORIGINAL_LABEL: &str = "original";
pub const COMMAND_OPTIONS_SECTION: &str = "command options";
pub const CLIENT_ENV_OPTION: &str = "client_env";

pub const GERRIT_CHANGE_NUMBER: &str = "GERRIT_CHANGE_NUMBER";
pub const GERRIT_PATCHSET_NUMBER: &str = "GERRIT_PATCHSET_NUMBER";
pub const GERRIT_CHANGE_COMMIT_MESSAGE: &str = "GERRIT_CHANGE_COMMIT_MESSAGE";
pub const BUILD_URL: &str = "BUILD_URL";

/// Fold an `original` command line into the summary. Other labels are ignored.
pub fn apply(summary: &mut InvocationSummary, command_line: &CommandLine) -> Result<(), SummaryError> {
  if command_line.command_line_label != ORIGINAL_LABEL {
    return Ok(());
  }

  let mut saw_options = false;
  for section in &command_line.sections {
    let label = section.section_label.as_str();
    if label == COMMAND_OPTIONS_SECTION {
      saw_options = true;
      summary.env_vars = BTreeMap::new();
      parse_env_vars(section, &mut summary.env_vars);
      continue;
    }
    let Some(chunks) = &section.chunk_list else {
      continue;
    };
    let joined = chunks.chunk.join(" ");
    match label {
      "executable" => summary.command_line.executable = joined,
      "command" => summary.command_line.command = joined,
      "residual" => summary.command_line.residual = joined,
      _ => {}
    }
  }
  if !saw_options {
    tracing::debug!("no command options section on the original command line");
  }

  summary.change_number = env_int(&summary.env_vars, GERRIT_CHANGE_NUMBER)?.or(summary.change_number);
  summary.patchset_number = env_int(&summary.env_vars, GERRIT_PATCHSET_NUMBER)?.or(summary.patchset_number);

  if let Some(message) = summary.env_vars.get_mut(GERRIT_CHANGE_COMMIT_MESSAGE) {
    if let Some(decoded) = decode_commit_message(message) {
      *message = decoded;
    }
  }

  if let Some(url) = summary.env_vars.get(BUILD_URL).filter(|u| !u.is_empty()) {
    summary.build_url = url.clone();
    summary.build_uuid = Some(fingerprint::build_uuid(url));
  }

  Ok(())
}

/// Collect `client_env` options of the form `KEY=VALUE`, split at the first `=`.
/// Entries without `=` or with an empty key are skipped.
pub fn parse_env_vars(section: &CommandLineSection, dest: &mut BTreeMap<String, String>) {
  let Some(options) = &section.option_list else {
    return;
  };
  for option in &options.option {
    if option.option_name != CLIENT_ENV_OPTION {
      continue;
    }
    match option.option_value.split_once('=') {
      Some((key, value)) if !key.is_empty() => {
        dest.insert(key.to_string(), value.to_string());
      }
      _ => tracing::debug!(value = %option.option_value, "skipping malformed client_env entry"),
    }
  }
}

/// Parse a decimal env var. Absent or empty values are `None`; anything else
/// that is not an integer is an error naming the variable and its value.
fn env_int(env: &BTreeMap<String, String>, name: &str) -> Result<Option<i64>, SummaryError> {
  let Some(raw) = env.get(name).filter(|v| !v.is_empty()) else {
    return Ok(None);
  };
  raw.parse::<i64>().map(Some).map_err(|source| {
    tracing::error!(env_key = name, env_value = %raw, "failed to parse env var to int");
    SummaryError::EnvVar {
      name: name.to_string(),
      value: raw.clone(),
      source,
    }
  })
}

/// Commit messages are usually base64 encoded by the CI. Anything that does not
/// decode to UTF-8 text is kept as-is.
fn decode_commit_message(raw: &str) -> Option<String> {
  if raw.is_empty() {
    return None;
  }
  match base64::engine::general_purpose::STANDARD.decode(raw) {
    Ok(bytes) => match String::from_utf8(bytes) {
      Ok(text) => Some(text),
      Err(_) => {
        tracing::debug!("commit message decoded to non-UTF-8 bytes, keeping raw value");
        None
      }
    },
    Err(_) => {
      tracing::debug!("{} was not base64 encoded, assuming plain text", GERRIT_CHANGE_COMMIT_MESSAGE);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::{ChunkList, CommandOption, OptionList};

  fn options_section(values: &[(&str, &str)]) -> CommandLineSection {
    CommandLineSection {
      section_label: COMMAND_OPTIONS_SECTION.into(),
      chunk_list: None,
      option_list: Some(OptionList {
        option: values
          .iter()
          .map(|(name, value)| CommandOption {
            combined_form: format!("--{}={}", name, value),
            option_name: name.to_string(),
            option_value: value.to_string(),
          })
          .collect(),
      }),
    }
  }

  fn chunks(label: &str, parts: &[&str]) -> CommandLineSection {
    CommandLineSection {
      section_label: label.into(),
      chunk_list: Some(ChunkList {
        chunk: parts.iter().map(|p| p.to_string()).collect(),
      }),
      option_list: None,
    }
  }

  fn original(sections: Vec<CommandLineSection>) -> CommandLine {
    CommandLine {
      command_line_label: ORIGINAL_LABEL.into(),
      sections,
    }
  }

  #[test]
  fn env_vars_split_at_first_equals() {
    let section = options_section(&[
      ("client_env", "KEY=VALUE"),
      ("client_env", "EQ=a=b"),
      ("client_env", "EMPTY="),
      ("client_env", "NOEQUALS"),
      ("client_env", "=leading"),
      ("color", "yes"),
    ]);
    let mut env = BTreeMap::new();
    parse_env_vars(&section, &mut env);
    assert_eq!(env.get("KEY").map(String::as_str), Some("VALUE"));
    assert_eq!(env.get("EQ").map(String::as_str), Some("a=b"));
    assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
    assert_eq!(env.len(), 3);
  }

  #[test]
  fn non_original_command_line_is_ignored() {
    let mut summary = InvocationSummary::default();
    let cl = CommandLine {
      command_line_label: "canonical".into(),
      sections: vec![options_section(&[("client_env", "KEY=VALUE")])],
    };
    apply(&mut summary, &cl).unwrap();
    assert!(summary.env_vars.is_empty());
  }

  #[test]
  fn chunk_sections_fill_command_line() {
    let mut summary = InvocationSummary::default();
    let cl = original(vec![
      chunks("executable", &["bazel"]),
      chunks("command", &["test"]),
      chunks("residual", &["//foo/...", "//bar:baz"]),
    ]);
    apply(&mut summary, &cl).unwrap();
    assert_eq!(summary.command_line.executable, "bazel");
    assert_eq!(summary.command_line.command, "test");
    assert_eq!(summary.command_line.residual, "//foo/... //bar:baz");
  }

  #[test]
  fn gerrit_numbers_are_parsed() {
    let mut summary = InvocationSummary::default();
    let cl = original(vec![options_section(&[
      ("client_env", "GERRIT_CHANGE_NUMBER=42"),
      ("client_env", "GERRIT_PATCHSET_NUMBER=3"),
    ])]);
    apply(&mut summary, &cl).unwrap();
    assert_eq!(summary.change_number, Some(42));
    assert_eq!(summary.patchset_number, Some(3));
  }

  #[test]
  fn bad_change_number_fails() {
    let mut summary = InvocationSummary::default();
    let cl = original(vec![options_section(&[("client_env", "GERRIT_CHANGE_NUMBER=abc")])]);
    let err = apply(&mut summary, &cl).unwrap_err();
    match err {
      SummaryError::EnvVar { name, value, .. } => {
        assert_eq!(name, GERRIT_CHANGE_NUMBER);
        assert_eq!(value, "abc");
      }
      other => panic!("unexpected error {:?}", other),
    }
  }

  #[test]
  fn empty_change_number_is_ignored() {
    let mut summary = InvocationSummary::default();
    let cl = original(vec![options_section(&[("client_env", "GERRIT_CHANGE_NUMBER=")])]);
    apply(&mut summary, &cl).unwrap();
    assert_eq!(summary.change_number, None);
  }

  #[test]
  fn commit_message_is_decoded_when_base64() {
    let mut summary = InvocationSummary::default();
    // "Fix the flaky test"
    let cl = original(vec![options_section(&[(
      "client_env",
      "GERRIT_CHANGE_COMMIT_MESSAGE=Rml4IHRoZSBmbGFreSB0ZXN0",
    )])]);
    apply(&mut summary, &cl).unwrap();
    assert_eq!(
      summary.env_vars.get(GERRIT_CHANGE_COMMIT_MESSAGE).map(String::as_str),
      Some("Fix the flaky test")
    );
  }

  #[test]
  fn commit_message_kept_when_not_base64() {
    let mut summary = InvocationSummary::default();
    let cl = original(vec![options_section(&[(
      "client_env",
      "GERRIT_CHANGE_COMMIT_MESSAGE=not base64 at all!",
    )])]);
    apply(&mut summary, &cl).unwrap();
    assert_eq!(
      summary.env_vars.get(GERRIT_CHANGE_COMMIT_MESSAGE).map(String::as_str),
      Some("not base64 at all!")
    );
  }

  #[test]
  fn build_url_derives_uuid() {
    let mut summary = InvocationSummary::default();
    let cl = original(vec![options_section(&[(
      "client_env",
      "BUILD_URL=https://ci.example.com/job/7/",
    )])]);
    apply(&mut summary, &cl).unwrap();
    assert_eq!(summary.build_url, "https://ci.example.com/job/7/");
    assert_eq!(
      summary.build_uuid,
      Some(fingerprint::build_uuid("https://ci.example.com/job/7/"))
    );
  }
}
