use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// `--root` / `ADPILOT_ROOT` wins; otherwise the nearest ancestor of the
/// working directory containing `.adpilot/`, falling back to the working
/// directory itself.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_project(&cwd).unwrap_or(cwd)
}

fn find_project(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(adpilot_core::paths::ADPILOT_DIR).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn finds_project_from_subdirectory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".adpilot")).unwrap();
        let deep = dir.path().join("reports/2025");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(find_project(&deep).as_deref(), Some(dir.path()));
    }

    #[test]
    fn no_project_found() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_project(dir.path()), None);
    }
}
