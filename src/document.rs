//! YAML files: canonical documents in, snapshots and rewritten documents out

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::error::{PolicyError, Result};
use crate::models::CanonicalDocument;

/// Read any YAML document
pub async fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        PolicyError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Write any YAML document, creating parent directories
pub async fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_yaml::to_string(value)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Load and validate a canonical document
pub async fn load_document(path: &Path) -> Result<CanonicalDocument> {
    let doc: CanonicalDocument = read_yaml(path).await?;
    doc.validate()?;
    info!(
        "Loaded {} labels and {} filters from {:?}",
        doc.labels.len(),
        doc.filters.len(),
        path
    );
    Ok(doc)
}

pub async fn save_document(path: &Path, doc: &CanonicalDocument) -> Result<()> {
    write_yaml(path, doc).await?;
    info!("Wrote {} filters to {:?}", doc.filters.len(), path);
    Ok(())
}
