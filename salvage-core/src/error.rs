/// Errors surfaced by [`EntityStore`](crate::EntityStore) and
/// [`CheckpointStore`](crate::CheckpointStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Entity not found: {kind} with {attr} '{value}'")]
    NotFound {
        kind: String,
        attr: String,
        value: String,
    },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn not_found(kind: impl Into<String>, attr: impl Into<String>, value: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            attr: attr.into(),
            value: value.to_string(),
        }
    }

    /// Integrity, validation-at-save and I/O failures are recoverable in
    /// resilient runs; backend failures are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }
}
