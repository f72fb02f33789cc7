use mumble_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("unknown edge {0}")]
    UnknownEdge(String),
    #[error("unknown session {0}")]
    UnknownSession(u32),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("blob {0} not found")]
    BlobNotFound(String),
    #[error("auth collaborator error: {0}")]
    Auth(String),
    #[error("persistence error: {0}")]
    Db(String),
}
