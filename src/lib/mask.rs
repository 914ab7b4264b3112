//! Sensitive-key heuristic used when rendering values.

/// Fixed-width stand-in for a sensitive value.
pub const MASK_PLACEHOLDER: &str = "********";

/// Built-in fragments. A key is sensitive if it contains any of them,
/// ignoring case.
pub const DEFAULT_SENSITIVE_FRAGMENTS: &[&str] =
  &["secret", "token", "password", "api_key", "private_key"];

/// Printed before any unmasked output.
pub const UNMASK_WARNING: &str =
  "Warning: masking is disabled. Secret values will be displayed in plaintext.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Masker {
  fragments: Vec<String>,
}

impl Default for Masker {
  fn default() -> Self {
    Self {
      fragments: DEFAULT_SENSITIVE_FRAGMENTS
        .iter()
        .map(|fragment| fragment.to_string())
        .collect(),
    }
  }
}

impl Masker {
  /// Adds user fragments on top of the built-in ones. They never replace them.
  pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for fragment in fragments {
      let fragment = fragment.as_ref().trim().to_ascii_lowercase();
      if !fragment.is_empty() && !self.fragments.contains(&fragment) {
        self.fragments.push(fragment);
      }
    }
    self
  }

  pub fn fragments(&self) -> &[String] {
    &self.fragments
  }

  pub fn is_sensitive(&self, key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    self
      .fragments
      .iter()
      .any(|fragment| key.contains(fragment.as_str()))
  }
}

/// The text to show for `value`, redacted when `masked` and not `unmask`.
pub fn display_value(value: &str, masked: bool, unmask: bool) -> &str {
  if masked && !unmask {
    MASK_PLACEHOLDER
  } else {
    value
  }
}
