//! Typed configuration maps and their text renderings.
//!
//! Overrides shallow-merge over role defaults: each top-level key supplied by
//! the caller replaces the default wholesale, and the last write wins.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigRenderError;

/// Text format used when writing a [`ConfigMap`] to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// Indented `key: value` document with nested mappings and `- item` lists.
    Mapping,
    /// One `Key value` directive per line, as read by secure-shell servers.
    Directive,
}

/// Ordered configuration map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap(BTreeMap<String, Value>);

impl ConfigMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from key/value pairs; later pairs win.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut map = Self::new();
        for (key, value) in pairs {
            map.insert(key, value);
        }
        map
    }

    /// Inserts or replaces a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Shallow-merges `overrides` over `self`, overrides winning per key.
    #[must_use]
    pub fn merged_with(mut self, overrides: &Self) -> Self {
        for (key, value) in &overrides.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    /// Renders the map in the requested format.
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigRenderError> {
        match format {
            ConfigFormat::Mapping => Ok(render_mapping(self)),
            ConfigFormat::Directive => render_directives(self),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

fn render_mapping(map: &ConfigMap) -> String {
    let mut out = String::new();
    for (key, value) in map.iter() {
        write_mapping_entry(&mut out, 0, key, value);
    }
    out
}

fn write_mapping_entry(out: &mut String, indent: usize, key: &str, value: &Value) {
    let pad = " ".repeat(indent);
    let key = scalar_string(key);
    match value {
        Value::Object(entries) if !entries.is_empty() => {
            out.push_str(&format!("{pad}{key}:\n"));
            for (child_key, child) in entries {
                write_mapping_entry(out, indent + 2, child_key, child);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            out.push_str(&format!("{pad}{key}:\n"));
            for item in items {
                out.push_str(&format!("{pad}  - {}\n", inline_value(item)));
            }
        }
        other => {
            out.push_str(&format!("{pad}{key}: {}\n", inline_value(other)));
        }
    }
}

/// Renders a value on a single line. Collections fall back to JSON flow
/// syntax, which mapping readers accept.
fn inline_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => scalar_string(text),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn scalar_string(text: &str) -> String {
    if needs_quoting(text) {
        Value::String(text.to_owned()).to_string()
    } else {
        text.to_owned()
    }
}

fn needs_quoting(text: &str) -> bool {
    const RESERVED: [&str; 11] = [
        "true", "false", "yes", "no", "on", "off", "null", "~", "True", "False", "Null",
    ];
    if text.is_empty() || text.trim() != text || RESERVED.contains(&text) {
        return true;
    }
    if text.parse::<f64>().is_ok() {
        return true;
    }
    let starts_special = text
        .chars()
        .next()
        .is_some_and(|first| "-?:,[]{}#&*!|>'\"%@`".contains(first));
    starts_special || text.contains(": ") || text.contains(" #") || text.contains('\n')
}

fn render_directives(map: &ConfigMap) -> Result<String, ConfigRenderError> {
    let mut out = String::new();
    for (key, value) in map.iter() {
        match value {
            Value::Array(items) => {
                for item in items {
                    out.push_str(&format!("{key} {}\n", directive_value(key, item)?));
                }
            }
            other => {
                out.push_str(&format!("{key} {}\n", directive_value(key, other)?));
            }
        }
    }
    Ok(out)
}

fn directive_value(key: &str, value: &Value) -> Result<String, ConfigRenderError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Bool(true) => Ok("yes".to_owned()),
        Value::Bool(false) => Ok("no".to_owned()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(ConfigRenderError::UnsupportedValue {
                key: key.to_owned(),
                kind: value_kind(value),
            })
        }
    }
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn overrides_win_per_key() {
        let defaults = ConfigMap::from_pairs([("a", json!(1)), ("b", json!({"x": 1, "y": 2}))]);
        let overrides = ConfigMap::from_pairs([("b", json!({"x": 9}))]);
        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.get("a"), Some(&json!(1)));
        // Shallow merge: the nested mapping is replaced, not combined.
        assert_eq!(merged.get("b"), Some(&json!({"x": 9})));
    }

    #[test]
    fn last_pair_wins() {
        let map = ConfigMap::from_pairs([("key", json!("first")), ("key", json!("second"))]);
        assert_eq!(map.get("key"), Some(&json!("second")));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn renders_nested_mapping_document() {
        let map = ConfigMap::from_pairs([
            (
                "localhost",
                json!({"host": "127.0.0.1", "port": 2222, "user": "ci"}),
            ),
            ("known_hosts_file", json!("/tmp/ssh-known-hosts")),
        ]);
        let rendered = map.render(ConfigFormat::Mapping).expect("render mapping");
        assert_eq!(
            rendered,
            "known_hosts_file: /tmp/ssh-known-hosts\n\
             localhost:\n  host: 127.0.0.1\n  port: 2222\n  user: ci\n"
        );
    }

    #[test]
    fn renders_sequences_as_items() {
        let map = ConfigMap::from_pairs([("file_roots", json!(["/srv/salt", "/srv/extra"]))]);
        let rendered = map.render(ConfigFormat::Mapping).expect("render mapping");
        assert_eq!(rendered, "file_roots:\n  - /srv/salt\n  - /srv/extra\n");
    }

    #[rstest]
    #[case::reserved_word("yes", "\"yes\"")]
    #[case::numeric_text("120", "\"120\"")]
    #[case::empty("", "\"\"")]
    #[case::colon("a: b", "\"a: b\"")]
    #[case::plain("debug", "debug")]
    #[case::path("/var/log/x.log", "/var/log/x.log")]
    fn quotes_ambiguous_scalars(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(scalar_string(input), expected);
    }

    #[test]
    fn renders_directives_one_per_line() {
        let map = ConfigMap::from_pairs([
            ("Port", json!(2222)),
            ("UsePAM", json!(true)),
            ("HostKey", json!(["/k/rsa", "/k/ed25519"])),
        ]);
        let rendered = map.render(ConfigFormat::Directive).expect("render directives");
        assert_eq!(
            rendered,
            "HostKey /k/rsa\nHostKey /k/ed25519\nPort 2222\nUsePAM yes\n"
        );
    }

    #[test]
    fn directives_reject_nested_mappings() {
        let map = ConfigMap::from_pairs([("Match", json!({"User": "ci"}))]);
        let error = map
            .render(ConfigFormat::Directive)
            .expect_err("nested mapping must fail");
        assert!(matches!(
            error,
            ConfigRenderError::UnsupportedValue { ref key, kind: "mapping" } if key == "Match"
        ));
    }
}
