//! Sectioned `key = value` documents: parsing, rendering and file I/O.
//!
//! ```text
//! [audio]
//! s_id = audio
//! i_volume = 40
//! b_muted = no
//! ```
//!
//! Every section describes one subsystem.  Section order and key order are
//! preserved through a load/save cycle.

use std::fs;
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::ConfigError;
use crate::value::ConfigValue;

/// Key holding a subsystem's unique identifier.
pub const ID_KEY: &str = "s_id";

// ─────────────────────────────────────────────────────────────────────────────
// SubsystemConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered key → typed value map for one subsystem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubsystemConfig {
    entries: Vec<(String, ConfigValue)>,
}

impl SubsystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `s_id` value, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_KEY)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ConfigValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ConfigValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(ConfigValue::Float(f)) => Some(*f),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(ConfigValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_list(&self, key: &str) -> Option<&[Value]> {
        match self.get(key) {
            Some(ConfigValue::List(items)) => Some(items),
            _ => None,
        }
    }

    /// Insert or replace `key`.  Replacing keeps the key's original position.
    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON object preserving key order.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }
}

impl Serialize for SubsystemConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, ConfigValue)> for SubsystemConfig {
    fn from_iter<I: IntoIterator<Item = (String, ConfigValue)>>(iter: I) -> Self {
        let mut cfg = SubsystemConfig::new();
        for (k, v) in iter {
            cfg.set(k, v);
        }
        cfg
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigDocument
// ─────────────────────────────────────────────────────────────────────────────

/// A named section of a [`ConfigDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub config: SubsystemConfig,
}

/// An ordered set of sections, one per subsystem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    sections: Vec<Section>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from live subsystem configurations, naming every
    /// section after the subsystem's id.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingField`] when a configuration has no `s_id`.
    pub fn from_configs<'a, I>(configs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = &'a SubsystemConfig>,
    {
        let mut doc = ConfigDocument::new();
        for cfg in configs {
            let name = cfg.id().ok_or_else(|| ConfigError::MissingField {
                section: "<unnamed>".to_string(),
                key: ID_KEY.to_string(),
            })?;
            doc.push(name, cfg.clone())?;
        }
        Ok(doc)
    }

    /// Append a section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateSection`] when `name` is already present.
    pub fn push(&mut self, name: impl Into<String>, config: SubsystemConfig) -> Result<(), ConfigError> {
        let name = name.into();
        if self.section(&name).is_some() {
            return Err(ConfigError::DuplicateSection(name));
        }
        self.sections.push(Section { name, config });
        Ok(())
    }

    pub fn section(&self, name: &str) -> Option<&SubsystemConfig> {
        self.sections.iter().find(|s| s.name == name).map(|s| &s.config)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn into_sections(self) -> Vec<Section> {
        self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Parse a document from text.
    ///
    /// # Errors
    ///
    /// Any malformed line, unknown type tag, unparsable value, repeated
    /// section or repeated key is reported as a [`ConfigError::AtLine`].
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut doc = ConfigDocument::new();
        let mut current: Option<Section> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let at = |source: ConfigError| ConfigError::AtLine {
                line: line_no,
                source: Box::new(source),
            };
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| at(ConfigError::Syntax(format!("malformed section header '{line}'"))))?;
                if let Some(done) = current.take() {
                    doc.push(done.name, done.config).map_err(at)?;
                }
                if doc.section(name).is_some() {
                    return Err(at(ConfigError::DuplicateSection(name.to_string())));
                }
                current = Some(Section {
                    name: name.to_string(),
                    config: SubsystemConfig::new(),
                });
                continue;
            }

            let split = line
                .find(['=', ':'])
                .ok_or_else(|| at(ConfigError::Syntax(format!("expected 'key = value', found '{line}'"))))?;
            let key = line[..split].trim();
            let raw = line[split + 1..].trim();
            if key.is_empty() {
                return Err(at(ConfigError::Syntax("empty key".to_string())));
            }

            let section = current
                .as_mut()
                .ok_or_else(|| at(ConfigError::Syntax(format!("key '{key}' appears before any section"))))?;
            if section.config.contains_key(key) {
                return Err(at(ConfigError::DuplicateKey {
                    section: section.name.clone(),
                    key: key.to_string(),
                }));
            }
            let value = ConfigValue::parse(key, raw).map_err(at)?;
            section.config.set(key, value);
        }

        if let Some(done) = current.take() {
            doc.push(done.name, done.config)?;
        }
        Ok(doc)
    }

    /// Render the document in the persisted text format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in section.config.iter() {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(&value.render());
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

/// Whether `key = value` survives a render/parse cycle unchanged.
///
/// Keys may not contain separators, line breaks or leading comment and
/// section markers; neither keys nor string values may carry surrounding
/// whitespace, which the parser trims.
///
/// # Errors
///
/// [`ConfigError::Unstorable`] naming the offending key.
pub fn check_storable(key: &str, value: &ConfigValue) -> Result<(), ConfigError> {
    let reject = |reason| {
        Err(ConfigError::Unstorable {
            key: key.escape_debug().to_string(),
            reason,
        })
    };
    if key.is_empty() || key.trim() != key {
        return reject("keys may not be empty or padded with whitespace");
    }
    if key.contains(['=', ':']) || key.chars().any(char::is_control) {
        return reject("keys may not contain '=', ':' or control characters");
    }
    if key.starts_with(['#', ';', '[']) {
        return reject("keys may not start with '#', ';' or '['");
    }
    if let ConfigValue::Str(text) = value {
        if text.contains(['\n', '\r']) {
            return reject("string values may not contain line breaks");
        }
        if text.trim() != text {
            return reject("string values may not be padded with whitespace");
        }
    }
    Ok(())
}

/// Read and parse the document at `path`.
pub fn load(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    ConfigDocument::parse(&raw)
}

/// Write `doc` to `path`.
///
/// The text is written to a sibling temporary file first and renamed over the
/// target, so a crash mid-write never leaves a truncated file behind.
pub fn save(doc: &ConfigDocument, path: &Path) -> Result<(), ConfigError> {
    let io_err = |e: std::io::Error| ConfigError::Io {
        path: path.display().to_string(),
        details: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, doc.render()).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    tracing::debug!(path = %path.display(), sections = doc.len(), "configuration written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
# subsystems
[audio]
s_id = audio
i_volume = 40
b_muted = no
f_gain = 0.75

; radio
[rtltcp1]
s_id: rtltcp1
s_command = rtl_tcp
l_args = ["-a", "0.0.0.0", "-p", 1234]
b_autostart = TRUE
"#;

    #[test]
    fn parses_sections_in_order() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        let names: Vec<&str> = doc.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["audio", "rtltcp1"]);

        let audio = doc.section("audio").unwrap();
        assert_eq!(audio.id(), Some("audio"));
        assert_eq!(audio.get_int("i_volume"), Some(40));
        assert_eq!(audio.get_bool("b_muted"), Some(false));
        assert_eq!(audio.get_float("f_gain"), Some(0.75));

        let rtl = doc.section("rtltcp1").unwrap();
        assert_eq!(rtl.get_bool("b_autostart"), Some(true));
        assert_eq!(rtl.get_list("l_args").unwrap()[3], json!(1234));
    }

    #[test]
    fn key_order_is_preserved() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        let keys: Vec<&str> = doc.section("audio").unwrap().iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["s_id", "i_volume", "b_muted", "f_gain"]);
    }

    #[test]
    fn unknown_tag_is_rejected_with_line() {
        let err = ConfigDocument::parse("[a]\ns_id = a\nx_bad = 1\n").unwrap_err();
        match err {
            ConfigError::AtLine { line, source } => {
                assert_eq!(line, 3);
                assert!(matches!(*source, ConfigError::UnknownTag { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bad_value_is_rejected() {
        let err = ConfigDocument::parse("[a]\ni_port = abc\n").unwrap_err();
        assert!(err.to_string().contains("i_port"));
    }

    #[test]
    fn structural_errors() {
        assert!(ConfigDocument::parse("s_id = orphan\n").is_err());
        assert!(ConfigDocument::parse("[a]\nno separator here\n").is_err());
        assert!(ConfigDocument::parse("[a\ns_id = a\n").is_err());
        assert!(ConfigDocument::parse("[a]\n[a]\n").is_err());
        assert!(ConfigDocument::parse("[a]\ni_x = 1\ni_x = 2\n").is_err());
    }

    #[test]
    fn render_then_parse_is_lossless() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        let again = ConfigDocument::parse(&doc.render()).unwrap();
        assert_eq!(doc, again);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut cfg = ConfigDocument::parse(SAMPLE).unwrap().section("audio").unwrap().clone();
        cfg.set("i_volume", ConfigValue::Int(80));
        cfg.set("b_test", ConfigValue::Bool(true));
        let keys: Vec<&str> = cfg.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["s_id", "i_volume", "b_muted", "f_gain", "b_test"]);
        assert_eq!(cfg.get_int("i_volume"), Some(80));
    }

    #[test]
    fn json_view_keeps_order_and_types() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        let v = doc.section("audio").unwrap().to_json();
        let keys: Vec<&String> = v.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["s_id", "i_volume", "b_muted", "f_gain"]);
        assert_eq!(v["i_volume"], json!(40));
        assert_eq!(serde_json::to_value(doc.section("audio").unwrap()).unwrap(), v);
    }

    #[test]
    fn from_configs_names_sections_by_id() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        let configs: Vec<SubsystemConfig> = doc.sections().iter().map(|s| s.config.clone()).collect();
        let rebuilt = ConfigDocument::from_configs(&configs).unwrap();
        assert_eq!(rebuilt, doc);

        let anonymous = SubsystemConfig::new();
        assert!(ConfigDocument::from_configs([&anonymous]).is_err());
    }

    #[test]
    fn storable_values_survive_render() {
        let cases = [
            ("s_note", ConfigValue::Str("two words: a=b".into())),
            ("l_lines", ConfigValue::List(vec![json!("a\nb")])),
            ("f_gain", ConfigValue::Float(0.1)),
        ];
        for (key, value) in cases {
            check_storable(key, &value).unwrap();
            let mut config = SubsystemConfig::new();
            config.set("s_id", ConfigValue::Str("a".into()));
            config.set(key, value.clone());
            let mut doc = ConfigDocument::new();
            doc.push("a", config).unwrap();
            let back = ConfigDocument::parse(&doc.render()).unwrap();
            assert_eq!(back.section("a").unwrap().get(key), Some(&value));
        }
    }

    #[test]
    fn unstorable_keys_and_values() {
        let text = |s: &str| ConfigValue::Str(s.to_string());
        for (key, value) in [
            ("s_note", text("hi\nx_bad = 1")),
            ("s_note", text("line\r")),
            ("s_pad", text("  padded  ")),
            ("s_a=b", text("x")),
            ("s_a:b", text("x")),
            (" s_a", text("x")),
            ("s_a\nb", text("x")),
            ("[s_a", text("x")),
        ] {
            assert!(
                matches!(check_storable(key, &value), Err(ConfigError::Unstorable { .. })),
                "{key:?} = {value:?} accepted"
            );
        }
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("subsystems.ini");
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        save(&doc, &path).expect("save");
        assert_eq!(load(&path).expect("load"), doc);
        assert!(!dir.path().join("nested").join("subsystems.ini.tmp").exists());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = load(&dir.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
