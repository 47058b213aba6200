// src/store/file.rs

//! Line-preserving model of a `key=value` properties file
//!
//! Every line is kept with its original text. Edits only splice the value
//! portion of matching entry lines, so comments, blank lines, ordering,
//! spacing around `=`, and trailing ` # comments` survive untouched.

use std::collections::BTreeMap;
use std::ops::Range;
use tracing::warn;

/// A single `key=value` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    raw: String,
    value_span: Range<usize>,
}

impl Entry {
    fn parse(raw: &str) -> Option<Self> {
        let sep = raw.find('=')?;
        let key = raw[..sep].trim();
        if key.is_empty() {
            return None;
        }

        let after_start = sep + 1;
        let after = &raw[after_start..];
        let body_end = trailing_comment_start(after).unwrap_or(after.len());
        let body = &after[..body_end];
        let lead = body.len() - body.trim_start().len();
        let value = body.trim();
        let start = after_start + lead;

        Some(Self {
            key: key.to_string(),
            value: value.to_string(),
            raw: raw.to_string(),
            value_span: start..start + value.len(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Replace the value, keeping everything around it byte-for-byte
    fn with_value(&self, value: &str) -> Self {
        let raw = format!(
            "{}{}{}",
            &self.raw[..self.value_span.start],
            value,
            &self.raw[self.value_span.end..]
        );
        let start = self.value_span.start;
        Self {
            key: self.key.clone(),
            value: value.to_string(),
            raw,
            value_span: start..start + value.len(),
        }
    }

    /// True when the line rewritten with `value` parses back to `value`
    fn round_trips(&self, value: &str) -> bool {
        Entry::parse(&self.with_value(value).raw).is_some_and(|e| e.value == value)
    }
}

/// Position of the whitespace that introduces a trailing `#` comment
fn trailing_comment_start(s: &str) -> Option<usize> {
    s.char_indices()
        .zip(s.chars().skip(1))
        .find(|((_, c), next)| c.is_whitespace() && *next == '#')
        .map(|((i, _), _)| i)
}

/// One line of a configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLine {
    Blank(String),
    Comment(String),
    Entry(Entry),
    /// Non-comment text without a usable `key=`; kept verbatim, never edited
    Other(String),
}

impl ConfigLine {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.trim_end().is_empty() {
            ConfigLine::Blank(raw.to_string())
        } else if trimmed.starts_with('#') || trimmed.starts_with('!') {
            ConfigLine::Comment(raw.to_string())
        } else {
            match Entry::parse(raw) {
                Some(entry) => ConfigLine::Entry(entry),
                None => ConfigLine::Other(raw.to_string()),
            }
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ConfigLine::Blank(s) | ConfigLine::Comment(s) | ConfigLine::Other(s) => s,
            ConfigLine::Entry(entry) => entry.raw(),
        }
    }
}

/// Ordered lines of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    lines: Vec<ConfigLine>,
    trailing_newline: bool,
}

/// Result of applying an edit set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub file: ConfigFile,
    /// Keys whose line was rewritten (in file order, once per key)
    pub applied_keys: Vec<String>,
    /// Edit keys with no matching line; these are never added
    pub unknown_keys: Vec<String>,
    /// Edit keys whose new value would not survive a re-read of the file
    pub rejected_keys: Vec<String>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Self {
        let trailing_newline = text.ends_with('\n');
        let body = if trailing_newline {
            &text[..text.len() - 1]
        } else {
            text
        };

        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n').map(ConfigLine::parse).collect()
        };

        Self {
            lines,
            trailing_newline,
        }
    }

    pub fn lines(&self) -> &[ConfigLine] {
        &self.lines
    }

    /// Entry lines in file order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.lines.iter().filter_map(|line| match line {
            ConfigLine::Entry(entry) => Some(entry),
            _ => None,
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().any(|e| e.key == key)
    }

    pub fn render(&self) -> String {
        let mut out = self
            .lines
            .iter()
            .map(ConfigLine::text)
            .collect::<Vec<_>>()
            .join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }

    /// Rewrite the values of existing keys; unknown keys are reported, not added
    ///
    /// A value is rejected for every occurrence of its key when writing it
    /// would not read back unchanged: line breaks, surrounding whitespace, or
    /// text that would be taken for a trailing ` #` comment.
    pub fn apply_edits(&self, edits: &BTreeMap<String, String>) -> EditOutcome {
        let mut rejected_keys: Vec<String> = Vec::new();
        for (key, value) in edits {
            if value.contains('\n') || value.contains('\r') {
                warn!("Ignoring edit for {}: value contains a line break", key);
                rejected_keys.push(key.clone());
            } else if self
                .entries()
                .any(|entry| entry.key == *key && !entry.round_trips(value))
            {
                warn!(
                    "Ignoring edit for {}: value {:?} would not read back unchanged",
                    key, value
                );
                rejected_keys.push(key.clone());
            }
        }

        let mut applied_keys: Vec<String> = Vec::new();
        let lines = self
            .lines
            .iter()
            .map(|line| match line {
                ConfigLine::Entry(entry) if !rejected_keys.contains(&entry.key) => {
                    match edits.get(&entry.key) {
                        Some(value) => {
                            if !applied_keys.contains(&entry.key) {
                                applied_keys.push(entry.key.clone());
                            }
                            ConfigLine::Entry(entry.with_value(value))
                        }
                        None => line.clone(),
                    }
                }
                _ => line.clone(),
            })
            .collect();

        let unknown_keys: Vec<String> = edits
            .keys()
            .filter(|k| !rejected_keys.contains(k) && !self.contains_key(k))
            .cloned()
            .collect();

        for key in &unknown_keys {
            warn!("Ignoring edit for unknown key: {}", key);
        }

        EditOutcome {
            file: ConfigFile {
                lines,
                trailing_newline: self.trailing_newline,
            },
            applied_keys,
            unknown_keys,
            rejected_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edits(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_line_kinds() {
        assert!(matches!(ConfigLine::parse(""), ConfigLine::Blank(_)));
        assert!(matches!(ConfigLine::parse("   "), ConfigLine::Blank(_)));
        assert!(matches!(ConfigLine::parse("# note"), ConfigLine::Comment(_)));
        assert!(matches!(ConfigLine::parse("  ! note"), ConfigLine::Comment(_)));
        assert!(matches!(ConfigLine::parse("no separator"), ConfigLine::Other(_)));
        assert!(matches!(ConfigLine::parse("=orphan"), ConfigLine::Other(_)));
        assert!(matches!(ConfigLine::parse("a=b"), ConfigLine::Entry(_)));
    }

    #[test]
    fn test_first_equals_is_separator() {
        let ConfigLine::Entry(entry) = ConfigLine::parse("db.url=jdbc:pg://h/db?a=b") else {
            panic!("expected entry");
        };
        assert_eq!(entry.key, "db.url");
        assert_eq!(entry.value, "jdbc:pg://h/db?a=b");
    }

    #[test]
    fn test_trailing_comment_is_not_value() {
        let ConfigLine::Entry(entry) = ConfigLine::parse("smtp.port = 25  # default") else {
            panic!("expected entry");
        };
        assert_eq!(entry.key, "smtp.port");
        assert_eq!(entry.value, "25");
    }

    #[test]
    fn test_hash_inside_value_is_kept() {
        let ConfigLine::Entry(entry) = ConfigLine::parse("url=http://host/#anchor") else {
            panic!("expected entry");
        };
        assert_eq!(entry.value, "http://host/#anchor");
    }

    #[test]
    fn test_render_round_trips_text() {
        let text = "# header\n\na = 1\nweird line\nb=2 # note\n";
        assert_eq!(ConfigFile::parse(text).render(), text);

        let no_newline = "a=1\nb=2";
        assert_eq!(ConfigFile::parse(no_newline).render(), no_newline);

        assert_eq!(ConfigFile::parse("").render(), "");
    }

    #[test]
    fn test_apply_edits_scenario() {
        let file = ConfigFile::parse("mail.host=old.example.com\n#comment\napp.name=demo\n");
        let outcome = file.apply_edits(&edits(&[("mail.host", "new.example.com")]));

        assert_eq!(
            outcome.file.render(),
            "mail.host=new.example.com\n#comment\napp.name=demo\n"
        );
        assert_eq!(outcome.applied_keys, vec!["mail.host".to_string()]);
        assert!(outcome.unknown_keys.is_empty());
    }

    #[test]
    fn test_apply_edits_preserves_layout() {
        let file = ConfigFile::parse("  smtp.port = 25  # default\r\nother=x\n");
        let outcome = file.apply_edits(&edits(&[("smtp.port", "587")]));

        assert_eq!(outcome.file.render(), "  smtp.port = 587  # default\r\nother=x\n");
    }

    #[test]
    fn test_apply_edits_only_touches_value() {
        // Value text that also occurs in the key must not be rewritten there
        let file = ConfigFile::parse("host.host=host\n");
        let outcome = file.apply_edits(&edits(&[("host.host", "other")]));

        assert_eq!(outcome.file.render(), "host.host=other\n");
    }

    #[test]
    fn test_apply_edits_fills_empty_value() {
        let file = ConfigFile::parse("api.key=\n");
        let outcome = file.apply_edits(&edits(&[("api.key", "secret")]));

        assert_eq!(outcome.file.render(), "api.key=secret\n");
    }

    #[test]
    fn test_apply_edits_is_idempotent() {
        let file = ConfigFile::parse("a=1\n# c\nb=2\n");
        let set = edits(&[("a", "10"), ("b", "20")]);

        let once = file.apply_edits(&set).file;
        let twice = once.apply_edits(&set).file;

        assert_eq!(once.render(), twice.render());
    }

    #[test]
    fn test_unknown_key_is_reported_and_ignored() {
        let file = ConfigFile::parse("a=1\nb=2\n");

        let with_unknown = file.apply_edits(&edits(&[("a", "9"), ("typo.key", "x")]));
        let without = file.apply_edits(&edits(&[("a", "9")]));

        assert_eq!(with_unknown.file, without.file);
        assert_eq!(with_unknown.unknown_keys, vec!["typo.key".to_string()]);
    }

    #[test]
    fn test_comment_lines_are_never_edited() {
        let file = ConfigFile::parse("#a=1\na=2\n");
        let outcome = file.apply_edits(&edits(&[("a", "3")]));

        assert_eq!(outcome.file.render(), "#a=1\na=3\n");
    }

    #[test]
    fn test_duplicate_keys_all_rewritten() {
        let file = ConfigFile::parse("a=1\nb=2\na=3\n");
        let outcome = file.apply_edits(&edits(&[("a", "x")]));

        assert_eq!(outcome.file.render(), "a=x\nb=2\na=x\n");
        assert_eq!(outcome.applied_keys, vec!["a".to_string()]);
    }

    #[test]
    fn test_line_break_in_value_is_rejected() {
        let file = ConfigFile::parse("a=1\n");
        let outcome = file.apply_edits(&edits(&[("a", "2\nadmin.password=x")]));

        assert_eq!(outcome.file.render(), "a=1\n");
        assert_eq!(outcome.rejected_keys, vec!["a".to_string()]);
        assert!(outcome.applied_keys.is_empty());
    }

    #[test]
    fn test_values_that_do_not_read_back_are_rejected() {
        let file = ConfigFile::parse("color=red\na= 1 # note\nb=2\n");

        for value in ["blue #1", " x", "x ", "\t"] {
            let outcome = file.apply_edits(&edits(&[("a", value), ("color", value), ("b", "3")]));

            assert_eq!(
                outcome.rejected_keys,
                vec!["a".to_string(), "color".to_string()],
                "value {:?}",
                value
            );
            assert_eq!(outcome.file.render(), "color=red\na= 1 # note\nb=3\n");
        }

        // After "= " a leading '#' would start the trailing comment
        let outcome = file.apply_edits(&edits(&[("a", "#x"), ("color", "#x")]));
        assert_eq!(outcome.rejected_keys, vec!["a".to_string()]);
        assert_eq!(outcome.file.render(), "color=#x\na= 1 # note\nb=2\n");
    }

    #[test]
    fn test_hash_without_leading_space_is_accepted() {
        let file = ConfigFile::parse("color=red\n");
        let outcome = file.apply_edits(&edits(&[("color", "#00ff00")]));

        assert!(outcome.rejected_keys.is_empty());
        assert_eq!(outcome.file.render(), "color=#00ff00\n");
    }

    #[test]
    fn test_written_values_read_back_and_reapply_unchanged() {
        let file = ConfigFile::parse("color=red\na = 1  # note\nurl=\nb=2\n");
        let set = edits(&[
            ("color", "blue#1"),
            ("a", "x y"),
            ("url", "http://h/#/p?q=1"),
            ("b", "blue #1"),
        ]);

        let once = file.apply_edits(&set).file;
        let reparsed = ConfigFile::parse(&once.render());
        assert_eq!(reparsed, once);

        for entry in reparsed.entries().filter(|e| e.key != "b") {
            assert_eq!(Some(&entry.value), set.get(&entry.key));
        }

        let twice = reparsed.apply_edits(&set).file;
        assert_eq!(once.render(), twice.render());
    }
}
