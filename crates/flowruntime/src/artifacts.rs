use async_trait::async_trait;
use flowcore::FlowError;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Descriptive fields stored alongside an artifact's bytes.
#[derive(Debug, Clone)]
pub struct ArtifactMetadata {
    pub name: String,
    pub mime_type: String,
    pub extra: Value,
}

/// External file storage for binary node outputs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` and return a reference usable for later retrieval.
    async fn store(&self, bytes: Vec<u8>, metadata: &ArtifactMetadata) -> Result<String, FlowError>;

    async fn delete(&self, artifact_ref: &str) -> Result<(), FlowError>;
}

/// Process-local artifact store, used by default and in tests.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    blobs: RwLock<HashMap<String, (ArtifactMetadata, Vec<u8>)>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, artifact_ref: &str) -> Option<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(artifact_ref)
            .map(|(_, bytes)| bytes.clone())
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn store(&self, bytes: Vec<u8>, metadata: &ArtifactMetadata) -> Result<String, FlowError> {
        let artifact_ref = format!("mem://{}/{}", Uuid::new_v4(), metadata.name);
        self.blobs
            .write()
            .await
            .insert(artifact_ref.clone(), (metadata.clone(), bytes));
        Ok(artifact_ref)
    }

    async fn delete(&self, artifact_ref: &str) -> Result<(), FlowError> {
        self.blobs
            .write()
            .await
            .remove(artifact_ref)
            .map(|_| ())
            .ok_or_else(|| FlowError::Artifact(format!("unknown artifact {}", artifact_ref)))
    }
}
