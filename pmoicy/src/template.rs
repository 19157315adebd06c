//! Minimal text templates for building stream titles from JSON documents.
//!
//! A template is literal text interleaved with field actions:
//!
//! ```text
//! {{ .artist }} - {{ .title }}
//! {{ .now.song.title }} ({{ .now.song.year }})
//! ```
//!
//! A field path is looked up in the decoded document; anything missing,
//! `null` or reached through a non-object renders as an empty string.
//! Strings are inserted verbatim, numbers and booleans in their JSON text
//! form, arrays and objects as compact JSON.
//!
//! `{{-` and `-}}` trim the whitespace of the neighbouring literal text.

use std::fmt;

use serde_json::{Map, Value};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Template parsing error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// `{{` without a matching `}}`
    #[error("unclosed action starting at byte {offset}")]
    Unclosed { offset: usize },

    /// `{{ }}` with nothing inside
    #[error("empty action at byte {offset}")]
    EmptyAction { offset: usize },

    /// Action that is not a `.field.path`
    #[error("invalid field reference {action:?} at byte {offset}")]
    InvalidField { offset: usize, action: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Vec<String>),
}

/// A parsed title template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TitleTemplate {
    /// Parses `source` into a template.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;
        let mut trim_next_literal = false;

        while let Some(start) = rest.find(OPEN) {
            let body_start = start + OPEN.len();
            let Some(len) = rest[body_start..].find(CLOSE) else {
                return Err(TemplateError::Unclosed {
                    offset: offset + start,
                });
            };

            let mut body = &rest[body_start..body_start + len];
            let trim_before = body.starts_with('-');
            if trim_before {
                body = &body[1..];
            }
            let trim_after = body.ends_with('-');
            if trim_after {
                body = &body[..body.len() - 1];
            }

            let mut literal = &rest[..start];
            if trim_next_literal {
                literal = literal.trim_start();
            }
            if trim_before {
                literal = literal.trim_end();
            }
            push_literal(&mut segments, literal);

            segments.push(Segment::Field(parse_field(body, offset + start)?));

            let consumed = body_start + len + CLOSE.len();
            rest = &rest[consumed..];
            offset += consumed;
            trim_next_literal = trim_after;
        }

        let literal = if trim_next_literal {
            rest.trim_start()
        } else {
            rest
        };
        push_literal(&mut segments, literal);

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Template text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders the template against a decoded JSON object.
    pub fn render(&self, document: &Map<String, Value>) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(path) => {
                    if let Some(value) = lookup(document, path) {
                        write_value(&mut out, value);
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for TitleTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for TitleTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
}

fn parse_field(body: &str, offset: usize) -> Result<Vec<String>, TemplateError> {
    let action = body.trim();
    if action.is_empty() {
        return Err(TemplateError::EmptyAction { offset });
    }

    let invalid = || TemplateError::InvalidField {
        offset,
        action: action.to_string(),
    };

    let path = action.strip_prefix('.').ok_or_else(invalid)?;
    let keys: Vec<String> = path.split('.').map(str::to_string).collect();

    let valid_key = |key: &String| {
        !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    };
    if !keys.iter().all(valid_key) {
        return Err(invalid());
    }

    Ok(keys)
}

fn lookup<'a>(document: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = document.get(first)?;
    for key in rest {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_literal_only() {
        let tmpl = TitleTemplate::parse("Radio Paradise").unwrap();
        assert_eq!(tmpl.render(&Map::new()), "Radio Paradise");
    }

    #[test]
    fn test_field_substitution() {
        let tmpl = TitleTemplate::parse("{{.artist}} - {{ .title }}").unwrap();
        let md = doc(json!({"artist": "Miles Davis", "title": "So What"}));
        assert_eq!(tmpl.render(&md), "Miles Davis - So What");
    }

    #[test]
    fn test_missing_field_renders_empty() {
        let tmpl = TitleTemplate::parse("{{.artist}} - {{.title}}").unwrap();
        let md = doc(json!({"title": "So What"}));
        assert_eq!(tmpl.render(&md), " - So What");
    }

    #[test]
    fn test_nested_path() {
        let tmpl = TitleTemplate::parse("{{ .now.song.title }} ({{ .now.song.year }})").unwrap();
        let md = doc(json!({"now": {"song": {"title": "Giant Steps", "year": 1960}}}));
        assert_eq!(tmpl.render(&md), "Giant Steps (1960)");

        // a path through a scalar is just missing
        let md = doc(json!({"now": "live"}));
        assert_eq!(tmpl.render(&md), " ()");
    }

    #[test]
    fn test_scalar_rendering() {
        let tmpl = TitleTemplate::parse("{{.n}}|{{.f}}|{{.b}}|{{.z}}|{{.a}}|{{.o}}").unwrap();
        let md = doc(json!({
            "n": 42,
            "f": 9.5,
            "b": true,
            "z": null,
            "a": [1, "x"],
            "o": {"k": "v"}
        }));
        assert_eq!(tmpl.render(&md), r#"42|9.5|true||[1,"x"]|{"k":"v"}"#);
    }

    #[test]
    fn test_trim_markers() {
        let tmpl = TitleTemplate::parse("Now:   {{- .title -}}   !").unwrap();
        let md = doc(json!({"title": "Song"}));
        assert_eq!(tmpl.render(&md), "Now:Song!");
    }

    #[test]
    fn test_stray_closing_braces_are_literal() {
        let tmpl = TitleTemplate::parse("a }} b").unwrap();
        assert_eq!(tmpl.render(&Map::new()), "a }} b");
    }

    #[test]
    fn test_unclosed_action() {
        assert_eq!(
            TitleTemplate::parse("ok {{ .title"),
            Err(TemplateError::Unclosed { offset: 3 })
        );
    }

    #[test]
    fn test_empty_action() {
        assert_eq!(
            TitleTemplate::parse("{{ }}"),
            Err(TemplateError::EmptyAction { offset: 0 })
        );
    }

    #[test]
    fn test_invalid_fields() {
        for source in ["{{ title }}", "{{ .a..b }}", "{{ .a b }}", "{{ . }}", "x {{ .t | upper }}"] {
            assert!(
                matches!(
                    TitleTemplate::parse(source),
                    Err(TemplateError::InvalidField { .. })
                ),
                "{source} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_keeps_source() {
        let tmpl: TitleTemplate = "{{.artist}} - {{.title}}".parse().unwrap();
        assert_eq!(tmpl.to_string(), "{{.artist}} - {{.title}}");
        assert_eq!(tmpl.as_str(), "{{.artist}} - {{.title}}");
    }
}
