#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to serialize snapshot item: {0}")]
    Serialize(#[source] serde_json::Error),
}
