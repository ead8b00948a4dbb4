use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ADPILOT_DIR: &str = ".adpilot";
pub const CONFIG_FILE: &str = ".adpilot/config.yaml";
pub const DB_FILE: &str = ".adpilot/adpilot.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn adpilot_dir(root: &Path) -> PathBuf {
    root.join(ADPILOT_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/ads");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/ads/.adpilot/config.yaml")
        );
        assert_eq!(db_path(root), PathBuf::from("/tmp/ads/.adpilot/adpilot.redb"));
        assert_eq!(adpilot_dir(root), PathBuf::from("/tmp/ads/.adpilot"));
    }
}
