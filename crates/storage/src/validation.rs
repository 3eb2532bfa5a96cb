use std::path::{Component, Path};

use crate::StorageError;

/// Validates that an object name stays inside the store it is resolved against.
///
/// Rejects:
/// - Empty names and names made only of `.` components
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_object_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() {
        return Err(StorageError::InvalidName("empty name".into()));
    }

    let path = Path::new(name);

    if path.is_absolute() {
        return Err(StorageError::InvalidName(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(StorageError::InvalidName(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) => {
                return Err(StorageError::InvalidName(format!(
                    "path prefix not allowed: {name}"
                )));
            }
            Component::RootDir => {
                return Err(StorageError::InvalidName(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
        }
    }

    if normal == 0 {
        return Err(StorageError::InvalidName(format!(
            "name resolves to the store root: {name}"
        )));
    }

    Ok(())
}
