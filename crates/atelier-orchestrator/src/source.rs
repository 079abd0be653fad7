//! Declarative agent catalog sources.
//!
//! A source hands the loader a list of agent definitions plus a stable
//! revision marker; the loader only re-parses when the marker changes. The
//! format behind a source is an external concern - a JSON file ships here,
//! anything else implements [`CatalogSource`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use atelier_core::{AgentKind, AgentStatus, OrchestratorError};

/// Opaque revision marker for a catalog source (mtime, hash, version...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(String);

impl Revision {
    /// Create a revision from any stable marker string.
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// Revision derived from content bytes (SHA-256).
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(format!("{digest:x}"))
    }

    /// Get the inner marker string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One declarative agent definition, prior to validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique agent id.
    pub id: String,

    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,

    /// Breadth class.
    pub kind: AgentKind,

    /// Capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Concurrency limit.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Initial status.
    #[serde(default)]
    pub status: AgentStatus,
}

fn default_max_concurrency() -> u32 {
    1
}

/// A source of agent definitions with a stable revision marker.
pub trait CatalogSource: Send + Sync {
    /// Current revision of the underlying data.
    fn revision(&self) -> Result<Revision, OrchestratorError>;

    /// Fetch all definitions. Called only when the revision changed.
    fn fetch(&self) -> Result<Vec<AgentDefinition>, OrchestratorError>;
}

impl<S: CatalogSource + ?Sized> CatalogSource for std::sync::Arc<S> {
    fn revision(&self) -> Result<Revision, OrchestratorError> {
        (**self).revision()
    }

    fn fetch(&self) -> Result<Vec<AgentDefinition>, OrchestratorError> {
        (**self).fetch()
    }
}

/// JSON file source. The file holds an array of [`AgentDefinition`]s;
/// the revision is the SHA-256 of the file bytes.
pub struct FileCatalogSource {
    path: PathBuf,
}

impl FileCatalogSource {
    /// Create a source over the given file path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read_bytes(&self) -> Result<Vec<u8>, OrchestratorError> {
        std::fs::read(&self.path).map_err(|e| OrchestratorError::ConfigValidation {
            subject: self.path.display().to_string(),
            field: "source",
            reason: e.to_string(),
        })
    }
}

impl CatalogSource for FileCatalogSource {
    fn revision(&self) -> Result<Revision, OrchestratorError> {
        Ok(Revision::of_bytes(&self.read_bytes()?))
    }

    fn fetch(&self) -> Result<Vec<AgentDefinition>, OrchestratorError> {
        let bytes = self.read_bytes()?;
        serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::ConfigValidation {
            subject: self.path.display().to_string(),
            field: "source",
            reason: format!("invalid catalog JSON: {e}"),
        })
    }
}

/// In-memory source for embedders and tests. The revision is bumped
/// explicitly whenever the definitions are replaced.
pub struct InMemoryCatalogSource {
    inner: Mutex<(Revision, Vec<AgentDefinition>)>,
}

impl InMemoryCatalogSource {
    /// Create a source with an initial definition set.
    pub fn new(definitions: Vec<AgentDefinition>) -> Self {
        Self {
            inner: Mutex::new((Revision::new("1"), definitions)),
        }
    }

    /// Replace the definitions and bump the revision marker.
    pub fn replace(&self, definitions: Vec<AgentDefinition>, revision: Revision) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner = (revision, definitions);
    }
}

impl CatalogSource for InMemoryCatalogSource {
    fn revision(&self) -> Result<Revision, OrchestratorError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.0.clone())
    }

    fn fetch(&self) -> Result<Vec<AgentDefinition>, OrchestratorError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.1.clone())
    }
}
