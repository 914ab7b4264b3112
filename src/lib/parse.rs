//! Env-file codec.
//!
//! Parsing keeps every line it reads, so formatting an unmodified [`EnvFile`]
//! reproduces the input byte-for-byte: comments, blank lines, ordering,
//! quoting style, `export` prefixes and line endings all survive. Lines that
//! are edited through [`EnvFile::set`] are re-rendered with the file's own
//! line ending; everything else is written back verbatim.

use std::{
  borrow::Cow,
  collections::{BTreeMap, BTreeSet, HashMap},
  convert::TryFrom,
  fmt,
};

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::error::{ParseError, SyncError};
use crate::model::{EnvVar, validate_key};

const COMMENT_PREFIX: char = '#';
const ASSIGNMENT_OPERATOR: char = '=';
const EXPORT_KEYWORD: &str = "export";

/// A parsed env file: the live variables plus the layout around them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvFile<'a> {
  lines: Vec<EnvLine<'a>>,
  trailing_newline: bool,
  /// Lines are terminated with `\r\n`, judged by the first line.
  crlf: bool,
}

/// Parses `text` into an [`EnvFile`]. All-or-nothing: the first malformed
/// line aborts with its line number.
pub fn parse(text: &str) -> Result<EnvFile<'_>, ParseError> {
  EnvFile::try_from(text)
}

impl<'a> fmt::Display for EnvFile<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (index, line) in self.lines.iter().enumerate() {
      write!(f, "{}", line)?;
      if index + 1 < self.lines.len() || self.trailing_newline {
        // verbatim lines still carry their own `\r`
        if self.crlf && !line.is_verbatim() {
          write!(f, "\r")?;
        }
        writeln!(f)?;
      }
    }
    Ok(())
  }
}

impl<'a> TryFrom<&'a str> for EnvFile<'a> {
  type Error = ParseError;

  fn try_from(s: &'a str) -> Result<Self, Self::Error> {
    let trailing_newline = s.ends_with('\n');
    let body = s.strip_suffix('\n').unwrap_or(s);
    let crlf = s
      .split_once('\n')
      .is_some_and(|(first, _)| first.ends_with('\r'));

    #[cfg(feature = "tracing")]
    debug!("Parsing env file with {} bytes", s.len());

    let mut lines: Vec<EnvLine<'a>> = Vec::new();
    let mut live: HashMap<Cow<'a, str>, usize> = HashMap::new();

    if !s.is_empty() {
      for (index, raw) in body.split('\n').enumerate() {
        #[cfg(feature = "tracing")]
        trace!("Parsing line {}", index + 1);

        let line = EnvLine::parse(raw, index + 1)?;

        if let EnvLine::Variable(var) = &line
          && let Some(previous) = live.insert(var.key.clone(), lines.len())
        {
          #[cfg(feature = "tracing")]
          debug!(key = %var.key, "Duplicate key, earlier line kept as layout");

          lines[previous] = EnvLine::Shadowed {
            key: var.key.clone(),
            raw: Cow::Owned(lines[previous].to_string()),
          };
        }

        lines.push(line);
      }
    }

    #[cfg(feature = "tracing")]
    debug!("Parsed {} lines, {} variables", lines.len(), live.len());

    Ok(Self {
      lines,
      trailing_newline,
      crlf,
    })
  }
}

impl<'a> EnvFile<'a> {
  pub fn get(&self, key: &str) -> Option<&EnvVariable<'a>> {
    self.variables().find(|var| var.key == key)
  }

  /// Live variables in file order.
  pub fn variables(&self) -> impl Iterator<Item = &EnvVariable<'a>> {
    self.lines.iter().filter_map(|line| match line {
      EnvLine::Variable(var) => Some(var),
      _ => None,
    })
  }

  pub fn lines(&self) -> &[EnvLine<'a>] {
    &self.lines
  }

  pub fn is_empty(&self) -> bool {
    self.variables().next().is_none()
  }

  /// The live variables as validated model entries, in file order.
  pub fn env_vars(&self) -> Result<Vec<EnvVar>, SyncError> {
    self
      .variables()
      .map(|var| {
        let entry = EnvVar::new(var.key.as_ref(), var.value.as_ref())?;
        Ok(match &var.inline_comment {
          Some(comment) => entry.with_comment(comment.trim()),
          None => entry,
        })
      })
      .collect()
  }

  pub fn to_map(&self) -> BTreeMap<String, String> {
    self
      .variables()
      .map(|var| (var.key.to_string(), var.value.to_string()))
      .collect()
  }

  /// Updates `key` in place, or appends it when absent. Returns the previous
  /// value.
  pub fn set(&mut self, key: &str, value: &str) -> Result<Option<String>, SyncError> {
    validate_key(key).map_err(|source| SyncError::InvalidKey {
      key: key.to_string(),
      source,
    })?;

    for line in &mut self.lines {
      if let EnvLine::Variable(var) = line
        && var.key == key
      {
        let previous = var.value.to_string();
        if previous != value {
          #[cfg(feature = "tracing")]
          trace!(key, "Updating variable in place");

          var.value = Cow::Owned(value.to_string());
          var.quote = var.quote.for_value(value);
          var.raw = None;
        }
        return Ok(Some(previous));
      }
    }

    #[cfg(feature = "tracing")]
    trace!(key, "Appending variable");

    // the old last line had no terminator, so it gets one in the file's style
    if self.crlf
      && !self.trailing_newline
      && let Some(last) = self.lines.last_mut()
    {
      last.terminate_crlf();
    }

    self.lines.push(EnvLine::Variable(EnvVariable {
      key: Cow::Owned(key.to_string()),
      value: Cow::Owned(value.to_string()),
      inline_comment: None,
      quote: QuoteStyle::Bare.for_value(value),
      exported: false,
      raw: None,
    }));
    self.trailing_newline = true;

    Ok(None)
  }

  /// Deletes the line holding `key` along with any shadowed duplicates of it.
  /// Surrounding comments and blank lines are left as they are.
  pub fn remove(&mut self, key: &str) -> Option<String> {
    let previous = self.get(key).map(|var| var.value.to_string());
    self.lines.retain(|line| match line {
      EnvLine::Variable(var) => var.key != key,
      EnvLine::Shadowed { key: shadowed, .. } => shadowed != key,
      _ => true,
    });
    previous
  }

  /// Applies upserts then deletions. New keys are appended in key order.
  pub fn apply(
    &mut self,
    writes: &BTreeMap<String, String>,
    deletes: &BTreeSet<String>,
  ) -> Result<(), SyncError> {
    for (key, value) in writes {
      self.set(key, value)?;
    }
    for key in deletes {
      self.remove(key);
    }
    Ok(())
  }
}

/// One physical line of an env file.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvLine<'a> {
  Variable(EnvVariable<'a>),
  Comment(Cow<'a, str>),
  Blank(Cow<'a, str>),
  /// An earlier assignment overridden by a later one for the same key.
  Shadowed { key: Cow<'a, str>, raw: Cow<'a, str> },
}

impl<'a> EnvLine<'a> {
  fn parse(raw: &'a str, line_number: usize) -> Result<Self, ParseError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
      Ok(EnvLine::Blank(Cow::Borrowed(raw)))
    } else if trimmed.starts_with(COMMENT_PREFIX) {
      Ok(EnvLine::Comment(Cow::Borrowed(raw)))
    } else {
      EnvVariable::parse(raw, line_number).map(EnvLine::Variable)
    }
  }

  /// Whether this line is written back exactly as it was read.
  fn is_verbatim(&self) -> bool {
    match self {
      EnvLine::Variable(var) => var.raw.is_some(),
      _ => true,
    }
  }

  fn terminate_crlf(&mut self) {
    let raw = match self {
      EnvLine::Variable(var) => match &mut var.raw {
        Some(raw) => raw,
        None => return,
      },
      EnvLine::Comment(raw) | EnvLine::Blank(raw) | EnvLine::Shadowed { raw, .. } => raw,
    };
    if !raw.ends_with('\r') {
      raw.to_mut().push('\r');
    }
  }
}

impl<'a> fmt::Display for EnvLine<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EnvLine::Variable(var) => write!(f, "{}", var),
      EnvLine::Comment(raw) | EnvLine::Blank(raw) | EnvLine::Shadowed { raw, .. } => {
        write!(f, "{}", raw)
      }
    }
  }
}

/// How a value was (or will be) quoted on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
  Bare,
  Single,
  Double,
}

impl QuoteStyle {
  /// Keeps this style when it can represent `value`, otherwise picks one that can.
  fn for_value(self, value: &str) -> Self {
    match self {
      QuoteStyle::Double => QuoteStyle::Double,
      QuoteStyle::Single if !value.contains(['\'', '\n', '\r']) => QuoteStyle::Single,
      _ if needs_quotes(value) => QuoteStyle::Double,
      _ => QuoteStyle::Bare,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvVariable<'a> {
  pub key: Cow<'a, str>,
  /// The decoded value: quotes removed, escapes expanded.
  pub value: Cow<'a, str>,
  /// Text after the `#`, if the line carries a trailing comment.
  pub inline_comment: Option<Cow<'a, str>>,
  pub quote: QuoteStyle,
  pub exported: bool,
  raw: Option<Cow<'a, str>>,
}

impl<'a> fmt::Display for EnvVariable<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(raw) = &self.raw {
      return write!(f, "{}", raw);
    }
    if self.exported {
      write!(f, "{} ", EXPORT_KEYWORD)?;
    }
    write!(f, "{}{}", self.key, ASSIGNMENT_OPERATOR)?;
    match self.quote {
      QuoteStyle::Bare => write!(f, "{}", self.value)?,
      QuoteStyle::Single => write!(f, "'{}'", self.value)?,
      QuoteStyle::Double => write!(f, "\"{}\"", escape_double(&self.value))?,
    }
    if let Some(comment) = &self.inline_comment {
      write!(f, " {}{}", COMMENT_PREFIX, comment)?;
    }
    Ok(())
  }
}

impl<'a> EnvVariable<'a> {
  fn parse(raw: &'a str, line_number: usize) -> Result<Self, ParseError> {
    let trimmed = raw.trim();
    let Some((key_part, value_part)) = trimmed.split_once(ASSIGNMENT_OPERATOR) else {
      return Err(ParseError::new(line_number, "expected KEY=VALUE, found no '='"));
    };

    let (exported, key) = match key_part.strip_prefix(EXPORT_KEYWORD) {
      Some(rest) if rest.starts_with(char::is_whitespace) && !rest.trim().is_empty() => {
        (true, rest.trim())
      }
      _ => (false, key_part.trim()),
    };
    validate_key(key)
      .map_err(|err| ParseError::new(line_number, format!("invalid key '{}': {}", key, err)))?;

    let (value, quote, inline_comment) =
      parse_value(value_part).map_err(|reason| ParseError::new(line_number, reason))?;

    #[cfg(feature = "tracing")]
    trace!(
      "Parsed variable: key={}, quote={:?}, has_inline_comment={}",
      key,
      quote,
      inline_comment.is_some()
    );

    Ok(EnvVariable {
      key: Cow::Borrowed(key),
      value,
      inline_comment,
      quote,
      exported,
      raw: Some(Cow::Borrowed(raw)),
    })
  }
}

type ParsedValue<'a> = (Cow<'a, str>, QuoteStyle, Option<Cow<'a, str>>);

fn parse_value(part: &str) -> Result<ParsedValue<'_>, String> {
  let part = part.trim_start();

  if let Some(body) = part.strip_prefix('"') {
    let (value, rest) = parse_double_quoted(body)?;
    Ok((value, QuoteStyle::Double, parse_trailer(rest)?))
  } else if let Some(body) = part.strip_prefix('\'') {
    let end = body
      .find('\'')
      .ok_or_else(|| "unterminated single-quoted value".to_string())?;
    Ok((
      Cow::Borrowed(&body[..end]),
      QuoteStyle::Single,
      parse_trailer(&body[end + 1..])?,
    ))
  } else {
    // `#` opens a comment only at the start of the value or after whitespace.
    let comment_start = part.char_indices().find_map(|(i, c)| {
      let after_space = i == 0 || part[..i].ends_with(char::is_whitespace);
      (c == COMMENT_PREFIX && after_space).then_some(i)
    });
    match comment_start {
      Some(i) => Ok((
        Cow::Borrowed(part[..i].trim()),
        QuoteStyle::Bare,
        Some(Cow::Borrowed(&part[i + 1..])),
      )),
      None => Ok((Cow::Borrowed(part.trim()), QuoteStyle::Bare, None)),
    }
  }
}

/// Returns the decoded value and whatever follows the closing quote.
fn parse_double_quoted(body: &str) -> Result<(Cow<'_, str>, &str), String> {
  let mut decoded: Option<String> = None;
  let mut escaped = false;

  for (i, c) in body.char_indices() {
    if escaped {
      let out = decoded.get_or_insert_with(String::new);
      match c {
        'n' => out.push('\n'),
        'r' => out.push('\r'),
        't' => out.push('\t'),
        '"' | '\\' => out.push(c),
        other => {
          out.push('\\');
          out.push(other);
        }
      }
      escaped = false;
      continue;
    }
    match c {
      '\\' => {
        decoded.get_or_insert_with(|| body[..i].to_string());
        escaped = true;
      }
      '"' => {
        let value = match decoded {
          Some(owned) => Cow::Owned(owned),
          None => Cow::Borrowed(&body[..i]),
        };
        return Ok((value, &body[i + 1..]));
      }
      c => {
        if let Some(out) = decoded.as_mut() {
          out.push(c);
        }
      }
    }
  }

  Err("unterminated double-quoted value".to_string())
}

fn parse_trailer(rest: &str) -> Result<Option<Cow<'_, str>>, String> {
  let rest = rest.trim();
  if rest.is_empty() {
    Ok(None)
  } else if let Some(comment) = rest.strip_prefix(COMMENT_PREFIX) {
    Ok(Some(Cow::Borrowed(comment)))
  } else {
    Err(format!("unexpected characters after closing quote: {:?}", rest))
  }
}

/// Bare values are trimmed on read, so any edge whitespace needs quotes too.
fn needs_quotes(value: &str) -> bool {
  value != value.trim() || value.contains([' ', '\t', '"', '\'', '#', '$', '\\', '\n', '\r'])
}

fn escape_double(value: &str) -> Cow<'_, str> {
  if !value.contains(['\\', '"', '\n', '\r']) {
    return Cow::Borrowed(value);
  }
  let mut escaped = String::with_capacity(value.len() + 4);
  for c in value.chars() {
    match c {
      '\\' => escaped.push_str("\\\\"),
      '"' => escaped.push_str("\\\""),
      '\n' => escaped.push_str("\\n"),
      '\r' => escaped.push_str("\\r"),
      c => escaped.push(c),
    }
  }
  Cow::Owned(escaped)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_simple() {
    let input = "KEY=value\nANOTHER=test";
    let env: EnvFile = input.try_into().unwrap();

    let vars: Vec<_> = env.variables().collect();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars[0].key, "KEY");
    assert_eq!(vars[0].value, "value");
    assert_eq!(vars[1].key, "ANOTHER");
    assert_eq!(vars[1].value, "test");
  }

  #[test]
  fn test_parse_with_comments() {
    let input = "# This is a comment\nKEY=value\n\n# Another comment\nTEST=123\n";
    let env = parse(input).unwrap();

    assert!(matches!(&env.lines()[0], EnvLine::Comment(c) if c == "# This is a comment"));
    assert!(matches!(&env.lines()[2], EnvLine::Blank(_)));
    assert_eq!(env.to_map().len(), 2);
    assert_eq!(env.get("TEST").unwrap().value, "123");
  }

  #[test]
  fn test_parse_inline_comments() {
    let env = parse("KEY=value # This is inline\nTEST=123").unwrap();

    let var = env.get("KEY").unwrap();
    assert_eq!(var.value, "value");
    assert_eq!(var.inline_comment.as_deref(), Some(" This is inline"));

    let model = env.env_vars().unwrap();
    assert_eq!(model[0].key(), "KEY");
    assert_eq!(model[0].line_comment(), Some("This is inline"));
    assert_eq!(model[1].value(), "123");
  }

  #[test]
  fn test_hash_inside_unquoted_value_is_kept() {
    let env = parse("URL=http://example.com/#frag\nPASS=abc#def").unwrap();
    assert_eq!(env.get("URL").unwrap().value, "http://example.com/#frag");
    assert_eq!(env.get("PASS").unwrap().value, "abc#def");
  }

  #[test]
  fn test_parse_quoted_values() {
    let input = concat!(
      "A=\"my secret value\"\n",
      "B='single # quoted'\n",
      "C=\"value # not a comment\" # real comment\n",
      "D=\"say \\\"hi\\\" \\\\ done\"\n",
      "E=\"line\\nbreak\"\n",
      "F=\"\"\n",
    );
    let env = parse(input).unwrap();

    assert_eq!(env.get("A").unwrap().value, "my secret value");
    assert_eq!(env.get("B").unwrap().value, "single # quoted");
    assert_eq!(env.get("B").unwrap().quote, QuoteStyle::Single);
    let c = env.get("C").unwrap();
    assert_eq!(c.value, "value # not a comment");
    assert_eq!(c.inline_comment.as_deref(), Some(" real comment"));
    assert_eq!(env.get("D").unwrap().value, "say \"hi\" \\ done");
    assert_eq!(env.get("E").unwrap().value, "line\nbreak");
    assert_eq!(env.get("F").unwrap().value, "");
  }

  #[test]
  fn test_parse_export_and_spacing() {
    let env = parse("export DB_HOST=localhost\nKEY = value\nTOKEN=abc=def==").unwrap();
    let host = env.get("DB_HOST").unwrap();
    assert!(host.exported);
    assert_eq!(host.value, "localhost");
    assert_eq!(env.get("KEY").unwrap().value, "value");
    assert_eq!(env.get("TOKEN").unwrap().value, "abc=def==");
  }

  #[test]
  fn test_export_accepts_any_whitespace() {
    let env = parse("export\tTABBED=1\nexport   SPACED=2\nexportNAME=3\nexport = 4\n").unwrap();
    assert_eq!(env.get("export").unwrap().value, "4");
    assert!(env.get("TABBED").unwrap().exported);
    assert!(env.get("SPACED").unwrap().exported);
    let plain = env.get("exportNAME").unwrap();
    assert!(!plain.exported);
    assert_eq!(plain.value, "3");
  }

  #[test]
  fn test_key_without_value() {
    let env = parse("KEY=\nOTHER=   ").unwrap();
    assert_eq!(env.get("KEY").unwrap().value, "");
    assert_eq!(env.get("OTHER").unwrap().value, "");
    assert!(env.get("KEY").unwrap().inline_comment.is_none());
  }

  #[test]
  fn test_roundtrip_is_byte_exact() {
    let inputs = [
      "",
      "\n",
      "# Comment\nKEY=value\n\n# Orphan\nTEST=123 # inline",
      "  # indented comment\n\t\nexport A = 'x y'   # c\nB=\"q\\\"uote\"\n",
      "WIN=1\r\nOTHER=2\r\n",
      "DUP=1\nDUP=2\n",
      "EMPTY=\n\n\n",
    ];
    for input in inputs {
      let env = parse(input).unwrap();
      assert_eq!(env.to_string(), input, "round-trip failed for {:?}", input);
    }
  }

  #[test]
  fn test_malformed_lines_report_line_number() {
    let err = parse("A=1\n# fine\ninvalid line without equals\n").unwrap_err();
    assert_eq!(err.line_number, 3);

    let err = parse("A=1\n123BAD=x").unwrap_err();
    assert_eq!(err.line_number, 2);
    assert!(err.reason.contains("123BAD"));

    let err = parse("A=\"unterminated").unwrap_err();
    assert_eq!(err.line_number, 1);

    let err = parse("A='x' trailing").unwrap_err();
    assert!(err.reason.contains("after closing quote"));
  }

  #[test]
  fn test_duplicate_key_last_wins() {
    let env = parse("A=first\nB=2\nA=second\n").unwrap();
    assert_eq!(env.get("A").unwrap().value, "second");
    assert!(matches!(&env.lines()[0], EnvLine::Shadowed { key, .. } if key == "A"));
    assert_eq!(env.variables().count(), 2);
  }

  #[test]
  fn test_set_updates_in_place_and_appends() {
    let mut env = parse("# db\nDB_HOST=old # primary\n\nPORT=1\n").unwrap();
    assert_eq!(env.set("DB_HOST", "new").unwrap(), Some("old".to_string()));
    assert_eq!(env.set("NEW_KEY", "has space").unwrap(), None);

    assert_eq!(
      env.to_string(),
      "# db\nDB_HOST=new # primary\n\nPORT=1\nNEW_KEY=\"has space\"\n"
    );
  }

  #[test]
  fn test_set_keeps_crlf_line_endings() {
    let mut env = parse("A=1\r\nB=2\r\n").unwrap();
    env.set("A", "3").unwrap();
    env.set("C", "4").unwrap();
    assert_eq!(env.to_string(), "A=3\r\nB=2\r\nC=4\r\n");

    let mut env = parse("A=1\r\n# last").unwrap();
    env.set("B", "2").unwrap();
    assert_eq!(env.to_string(), "A=1\r\n# last\r\nB=2\r\n");

    let mut env = parse("A=1\nB=2").unwrap();
    env.set("C", "3").unwrap();
    assert_eq!(env.to_string(), "A=1\nB=2\nC=3\n");
  }

  #[test]
  fn test_set_keeps_quote_style() {
    let mut env = parse("A='old'\nB=\"old\"\nC=plain").unwrap();
    env.set("A", "new").unwrap();
    env.set("B", "new").unwrap();
    env.set("C", "with $var").unwrap();
    assert_eq!(env.to_string(), "A='new'\nB=\"new\"\nC=\"with $var\"");
  }

  #[test]
  fn test_set_rejects_invalid_key() {
    let mut env = EnvFile::default();
    assert!(matches!(
      env.set("BAD-KEY", "x"),
      Err(SyncError::InvalidKey { .. })
    ));
    assert!(env.is_empty());
  }

  #[test]
  fn test_remove_keeps_blank_structure() {
    let mut env = parse("A=1\n\nB=2\n\nC=3\n").unwrap();
    assert_eq!(env.remove("B"), Some("2".to_string()));
    assert_eq!(env.to_string(), "A=1\n\n\nC=3\n");
  }

  #[test]
  fn test_remove_drops_shadowed_duplicates() {
    let mut env = parse("A=1\nA=2\nB=3\n").unwrap();
    env.remove("A");
    let reparsed = parse(&env.to_string()).unwrap().to_map();
    assert!(!reparsed.contains_key("A"));
    assert_eq!(reparsed.len(), 1);
  }

  #[test]
  fn test_apply_appends_sorted() {
    let mut env = parse("KEEP=1\nDROP=2\n").unwrap();
    let writes = BTreeMap::from([
      ("ZED".to_string(), "z".to_string()),
      ("ALPHA".to_string(), "a".to_string()),
      ("KEEP".to_string(), "updated".to_string()),
    ]);
    let deletes = BTreeSet::from(["DROP".to_string()]);
    env.apply(&writes, &deletes).unwrap();
    assert_eq!(env.to_string(), "KEEP=updated\nALPHA=a\nZED=z\n");
  }

  #[test]
  fn test_written_values_reparse_to_same_value() {
    let values = [
      "quote \" back \\ hash # dollar $ newline\nend",
      "\u{3000}x",
      "x\u{0B}",
      "\u{0C}edge\u{85}",
      " padded ",
    ];
    for value in values {
      let mut env = EnvFile::default();
      env.set("TRICKY", value).unwrap();
      let text = env.to_string();
      let reparsed = parse(&text).unwrap();
      assert_eq!(reparsed.get("TRICKY").unwrap().value, value, "written as {:?}", text);
    }
  }
}
