//! Binding document loading.

use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow};
use statebind_types::BindingDocument;

/// Serialization format of a binding document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Infers the format from the path extension. Unknown or missing extensions read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Yaml,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
        }
    }
}

/// Parses a binding document from text.
pub fn parse_binding_str(content: &str, format: DocumentFormat) -> Result<BindingDocument> {
    match format {
        DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|error| anyhow!("invalid binding document (yaml): {error}")),
        DocumentFormat::Json => serde_json::from_str(content).map_err(|error| anyhow!("invalid binding document (json): {error}")),
    }
}

/// Loads a binding document and applies environment overrides to its plugin settings.
///
/// ```rust
/// use statebind_engine::parse_binding_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let path = temp_dir.path().join("bindings.yaml");
/// std::fs::write(&path, r#"
/// plugin:
///   sources:
///     url: http://myapi.hppr.dev/api
/// modules:
///   profile:
///     namespace: profile
///     bindings:
///       users:
///         bind: once
/// "#)?;
///
/// let document = parse_binding_file(&path)?;
/// assert!(document.modules.contains_key("profile"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_binding_file(path: impl AsRef<Path>) -> Result<BindingDocument> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read binding file: {}", path.display()))?;
    let format = DocumentFormat::from_path(path);
    let mut document = parse_binding_str(&content, format).with_context(|| format!("Failed to parse {} as {}", path.display(), format.as_str()))?;
    document.plugin.apply_env_overrides();
    Ok(document)
}
