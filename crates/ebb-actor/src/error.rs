/// Errors produced by actor submission operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    #[error("actor is closing or closed; submission rejected")]
    Rejected,
}
