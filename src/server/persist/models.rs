//! Row models for the gateway's persistent store reads.

use sqlx::FromRow;
use sqlx::types::Json;

/// One stored embedding, keyed by `(server_id, tool_name)`.
///
/// `content_hash` is the hash of the embedded text at generation time; a
/// mismatch means the tool's name or description changed and the stored
/// vector must not be reused.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub server_id: String,
    pub tool_name: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
}

/// Postgres row shape behind [`StoredEmbedding`]; the vector column is
/// JSONB.
#[derive(Debug, FromRow)]
pub(crate) struct EmbeddingRow {
    pub server_id: String,
    pub tool_name: String,
    pub content_hash: String,
    pub vector: Json<Vec<f32>>,
}

impl From<EmbeddingRow> for StoredEmbedding {
    fn from(row: EmbeddingRow) -> Self {
        Self {
            server_id: row.server_id,
            tool_name: row.tool_name,
            content_hash: row.content_hash,
            vector: row.vector.0,
        }
    }
}
