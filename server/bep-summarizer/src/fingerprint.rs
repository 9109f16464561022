//! Stable identifiers: problem ids and the per-build uuid.

use uuid::Uuid;

/// Compute a stable problem id from its variant and distinguishing parts.
///
/// Uses blake3 so the same problem gets the same id on every run, which is what
/// downstream storage keys and deduplicates on.
pub fn problem_id(kind: &str, parts: &[&str]) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(kind.as_bytes());
  for part in parts {
    hasher.update(b"|");
    hasher.update(part.as_bytes());
  }
  let hex = hasher.finalize().to_hex();
  format!("prb-{}", &hex[..24])
}

/// Name-based (v5, SHA-1) uuid of a build URL in the URL namespace.
pub fn build_uuid(build_url: &str) -> Uuid {
  Uuid::new_v5(&Uuid::NAMESPACE_URL, build_url.as_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_input_same_problem_id() {
    assert_eq!(
      problem_id("target", &["//a:b"]),
      problem_id("target", &["//a:b"])
    );
  }

  #[test]
  fn kind_is_part_of_the_id() {
    assert_ne!(problem_id("target", &["//a:b"]), problem_id("test", &["//a:b"]));
  }

  #[test]
  fn part_boundaries_matter() {
    assert_ne!(problem_id("action", &["ab", "c"]), problem_id("action", &["a", "bc"]));
  }

  #[test]
  fn problem_id_shape() {
    let id = problem_id("progress", &["ERROR: boom"]);
    assert!(id.starts_with("prb-"));
    assert_eq!(id.len(), 4 + 24);
    assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn build_uuid_is_deterministic_per_url() {
    let a = build_uuid("https://ci.example.com/job/42/");
    let b = build_uuid("https://ci.example.com/job/42/");
    let c = build_uuid("https://ci.example.com/job/43/");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.get_version_num(), 5);
  }
}
