//! Working-directory resolution: path normalization and the `get_directory`
//! / `change_directory` syscall bodies.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{AppError, FsError};
use crate::fs;

use super::pcb::Application;

/// Normalizes a path by collapsing repeated separators and resolving `.`
/// and `..`. Always returns an absolute path starting with `/`; `..` past
/// root is clamped there rather than erroring.
pub fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }
    fs::join_components(&components)
}

/// Resolves `path` against `cwd`: absolute paths are normalized as-is,
/// relative paths are joined onto `cwd` first.
pub fn resolve_path(path: &str, cwd: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        let mut combined = String::with_capacity(cwd.len() + 1 + path.len());
        combined.push_str(cwd);
        if !cwd.ends_with('/') {
            combined.push('/');
        }
        combined.push_str(path);
        normalize_path(&combined)
    }
}

/// Returns the process's current working directory.
pub fn get_directory(app: &Application) -> String {
    app.working_directory()
}

/// Changes the process's current working directory, validating the target
/// resolves to an existing directory node first.
pub fn change_directory(app: &Application, path: &str) -> Result<(), AppError> {
    let resolved = resolve_path(path, &app.working_directory());
    let info = fs::vfs().find_node(&resolved).map_err(|e| match e {
        FsError::NodeNotFound => AppError::NodeNotFound,
        _ => AppError::BadArg,
    })?;
    if !info.is_directory {
        return Err(AppError::BadArg);
    }
    app.set_working_directory(resolved);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_and_resolves_dots() {
        assert_eq!(normalize_path("/usr//local/../bin/./gcc"), "/usr/bin/gcc");
    }

    #[test]
    fn normalize_dotdot_past_root_clamps() {
        assert_eq!(normalize_path("/../../a"), "/a");
    }

    #[test]
    fn resolve_relative_joins_cwd() {
        assert_eq!(resolve_path("Documents/file.txt", "/home/user"), "/home/user/Documents/file.txt");
    }

    #[test]
    fn resolve_absolute_ignores_cwd() {
        assert_eq!(resolve_path("/etc/hosts", "/home"), "/etc/hosts");
    }
}
