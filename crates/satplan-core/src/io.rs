use crate::error::{PlanError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// A reader never observes a half-written plan.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as pretty JSON with a trailing newline and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_string_pretty(value)?;
    data.push('\n');
    atomic_write(path, data.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.yaml`/`.yml` are YAML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

/// Parse `text` in the given format.
pub fn parse_document<T: DeserializeOwned>(text: &str, format: DocumentFormat) -> Result<T> {
    let value = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
    };
    Ok(value)
}

/// Read and parse a JSON or YAML document, choosing the format by extension.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(PlanError::MalformedInput(format!(
            "file not found: {}",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)?;
    parse_document(&text, DocumentFormat::from_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/plans/plan.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("req.YML")),
            DocumentFormat::Yaml
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("plan.json")),
            DocumentFormat::Json
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("plan")),
            DocumentFormat::Json
        );
    }

    #[test]
    fn read_document_yaml_and_json() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("a.yaml");
        let json = dir.path().join("a.json");
        std::fs::write(&yaml, "x: 1\ny: 2\n").unwrap();
        std::fs::write(&json, r#"{"x": 1, "y": 2}"#).unwrap();

        let a: BTreeMap<String, u32> = read_document(&yaml).unwrap();
        let b: BTreeMap<String, u32> = read_document(&json).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn read_document_missing_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let err = read_document::<BTreeMap<String, u32>>(&dir.path().join("nope.json"))
            .unwrap_err();
        assert!(matches!(err, PlanError::MalformedInput(_)));
    }
}
