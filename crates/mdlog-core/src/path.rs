use crate::error::{Error, ErrorCode};

const MAX_PATH_LEN: usize = 512;

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorCode::InvalidPath, message)
}

/// Normalize and check a folder path (`projects/alpha`). Trailing slashes are dropped.
pub fn validate_folder(raw: &str) -> Result<String, Error> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("path is empty"));
    }
    if trimmed.len() > MAX_PATH_LEN {
        return Err(invalid("path is too long"));
    }
    if trimmed.starts_with('/') {
        return Err(invalid("path must be relative"));
    }
    if trimmed.contains('\\') || trimmed.contains('\0') {
        return Err(invalid("path contains a forbidden character"));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid(format!("path segment {segment:?} is not allowed")));
        }
    }
    Ok(trimmed.to_string())
}

/// Check a markdown file path (`projects/alpha/tasks.md`).
pub fn validate_file_path(raw: &str) -> Result<String, Error> {
    if raw.trim().ends_with('/') {
        return Err(invalid("file path must not end with '/'"));
    }
    let path = validate_folder(raw)?;
    if !path.ends_with(".md") || path.rsplit('/').next() == Some(".md") {
        return Err(invalid("file path must name a .md document"));
    }
    Ok(path)
}

/// `child` equals `parent` or lives underneath it. Segment-aware: `docs`
/// does not contain `docs2/a.md`.
pub fn is_sub_path(parent: &str, child: &str) -> bool {
    let parent = parent.trim_end_matches('/');
    if child == parent {
        return true;
    }
    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}
