use std::fmt::Write as _;

use sha2::{Digest, Sha512};
use xxhash_rust::xxh3::xxh3_64;

/// Prefix of every generated class name.
pub const CLASS_PREFIX: &str = "severed-";

/// Number of hex digits kept from the class digest.
const CLASS_HEX_LEN: usize = 7;

/// Number of hex digits kept for the pull-mode cache buster.
const SHORT_HEX_LEN: usize = 5;

/// Generates the class name for a piece of raw CSS.
///
/// Class names are written into both the rewritten source and the emitted
/// stylesheet, so they must be stable across runs, machines and versions.
/// Identical CSS yields the identical name; first wins on collision.
pub fn class_name(raw_css: &str) -> String {
  let digest = Sha512::digest(raw_css.as_bytes());
  let mut hex = String::with_capacity(CLASS_HEX_LEN + 1);
  for byte in digest.iter().take(CLASS_HEX_LEN / 2 + 1) {
    let _ = write!(hex, "{byte:02x}");
  }
  hex.truncate(CLASS_HEX_LEN);
  format!("{CLASS_PREFIX}{hex}")
}

/// Short content hash used as the `severed=` cache buster in pull-mode
/// virtual ids. Only needs to change whenever the CSS content changes.
pub fn short_hash(content: &str) -> String {
  let mut hex = format!("{:016x}", xxh3_64(content.as_bytes()));
  hex.truncate(SHORT_HEX_LEN);
  hex
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn class_name_is_prefixed_seven_hex() {
    let name = class_name("background: red");
    let hex = name.strip_prefix(CLASS_PREFIX).expect("prefix");
    assert_eq!(hex.len(), 7);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
  }

  #[test]
  fn class_name_is_deterministic() {
    assert_eq!(class_name("color: blue"), class_name("color: blue"));
  }

  #[test]
  fn distinct_css_gets_distinct_names() {
    assert_ne!(class_name("color: blue"), class_name("color: red"));
  }

  #[test]
  fn short_hash_is_five_hex() {
    let hash = short_hash(".a { color: red }");
    assert_eq!(hash.len(), 5);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn short_hash_tracks_content() {
    assert_eq!(short_hash("a"), short_hash("a"));
    assert_ne!(short_hash("a"), short_hash("b"));
  }
}
