use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A sync plan references a source that is not configured.
    #[error("sync plan references unknown source `{0}`")]
    UnknownPlanSource(String),
    /// A sync plan neither lists tables nor names a schema to discover them from.
    #[error("sync plan for source `{0}` has no tables and no schema")]
    EmptyPlan(String),
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
