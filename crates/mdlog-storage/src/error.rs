use mdlog_core::{FileId, WorkspaceId};

/// Store-level failures. These surface to callers as a generic internal error.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("workspace {0} does not exist")]
    UnknownWorkspace(WorkspaceId),
    #[error("file {0} does not exist")]
    UnknownFile(FileId),
}
