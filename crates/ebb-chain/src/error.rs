/// Errors produced by chain operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// A version map must record at least one read or write mark.
    #[error("refusing to publish an empty version map")]
    EmptyCommit,
}
