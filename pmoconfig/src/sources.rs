//! Table of relayed sources
//!
//! The sources file maps a source id (the first path segment of the proxy
//! URL) to the upstream stream and, optionally, a JSON endpoint plus a
//! template used to build the stream title:
//!
//! ```json
//! {
//!   "jazz": {
//!     "url": "http://origin.example/jazz.mp3",
//!     "metadataJsonUrl": "http://origin.example/jazz/now.json",
//!     "metadataFormat": "{{ .artist }} - {{ .title }}"
//!   }
//! }
//! ```
//!
//! The same structure is accepted in YAML when the file name ends in
//! `.yaml` or `.yml`. Entries are only parsed here; URLs and templates are
//! validated when the proxy router is built.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// One upstream stream exposed by the proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Upstream audio stream
    pub url: String,
    /// JSON document polled for the current title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_json_url: Option<String>,
    /// Title template applied to the JSON document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_format: Option<String>,
}

/// Sources keyed by id, iterated in id order
pub type Sources = BTreeMap<String, Source>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcesFormat {
    Json,
    Yaml,
}

impl SourcesFormat {
    /// YAML for `.yaml`/`.yml`, JSON for anything else
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => SourcesFormat::Yaml,
            _ => SourcesFormat::Json,
        }
    }
}

/// Parses a sources document
pub fn parse_sources(content: &str, format: SourcesFormat) -> Result<Sources> {
    let sources = match format {
        SourcesFormat::Json => serde_json::from_str(content).context("invalid JSON sources")?,
        SourcesFormat::Yaml => serde_yaml::from_str(content).context("invalid YAML sources")?,
    };
    Ok(sources)
}

/// Reads and parses the sources file at `path`
pub fn load_sources(path: &Path) -> Result<Sources> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources file {}", path.display()))?;
    let sources = parse_sources(&content, SourcesFormat::from_path(path))
        .with_context(|| format!("parsing sources file {}", path.display()))?;
    tracing::info!(
        sources_file = %path.display(),
        count = sources.len(),
        "Loaded sources"
    );
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "jazz": {
            "url": "http://origin.example/jazz.mp3",
            "metadataJsonUrl": "http://origin.example/jazz/now.json",
            "metadataFormat": "{{ .artist }} - {{ .title }}"
        },
        "plain": { "url": "http://origin.example/plain.aac" }
    }"#;

    #[test]
    fn test_parse_json() {
        let sources = parse_sources(JSON, SourcesFormat::Json).unwrap();
        assert_eq!(sources.len(), 2);

        let jazz = &sources["jazz"];
        assert_eq!(jazz.url, "http://origin.example/jazz.mp3");
        assert_eq!(
            jazz.metadata_json_url.as_deref(),
            Some("http://origin.example/jazz/now.json")
        );
        assert_eq!(
            jazz.metadata_format.as_deref(),
            Some("{{ .artist }} - {{ .title }}")
        );

        let plain = &sources["plain"];
        assert_eq!(plain.metadata_json_url, None);
        assert_eq!(plain.metadata_format, None);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = "jazz:\n  url: http://origin.example/jazz.mp3\n  metadataJsonUrl: http://origin.example/now.json\n  metadataFormat: \"{{ .title }}\"\n";
        let sources = parse_sources(yaml, SourcesFormat::Yaml).unwrap();
        assert_eq!(sources["jazz"].metadata_format.as_deref(), Some("{{ .title }}"));
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let err = parse_sources(r#"{"jazz": {"metadataFormat": "x"}}"#, SourcesFormat::Json)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("url"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourcesFormat::from_path(Path::new("s.yml")), SourcesFormat::Yaml);
        assert_eq!(SourcesFormat::from_path(Path::new("s.YAML")), SourcesFormat::Yaml);
        assert_eq!(SourcesFormat::from_path(Path::new("s.json")), SourcesFormat::Json);
        assert_eq!(SourcesFormat::from_path(Path::new("sources")), SourcesFormat::Json);
    }

    #[test]
    fn test_load_sources_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sources.json");
        fs::write(&file, JSON).unwrap();

        let sources = load_sources(&file).unwrap();
        assert_eq!(sources.keys().collect::<Vec<_>>(), vec!["jazz", "plain"]);

        let err = load_sources(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }
}
