use thiserror::Error;

#[derive(Debug, Error)]
pub enum TearError {
    /// A cutting branch, node or edge id does not resolve, or the network
    /// was assembled inconsistently.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Nodes left without a sub-area after flood fill, or a cut that does
    /// not separate anything.
    #[error("partition incomplete, unresolved buses: {}", .nodes.join(", "))]
    PartitionIncomplete { nodes: Vec<String> },

    #[error("solver error ({context}): {reason}")]
    Solver { context: String, reason: String },

    /// Malformed topology met during traversal.
    #[error("topology error: {0}")]
    Topology(String),

    /// A piecewise step was called before the steps it depends on.
    #[error("step out of order: {0}")]
    Sequence(String),
}

pub type Result<T> = std::result::Result<T, TearError>;
