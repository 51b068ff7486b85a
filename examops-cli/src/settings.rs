//! Locating the configuration file.
//!
//! An explicit `--config` always wins. Otherwise `examops.yaml` in the working
//! directory, then `<config dir>/examops/config.yaml` (e.g.
//! `~/.config/examops/config.yaml` on Linux) are tried in that order.

use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG_FILE: &str = "examops.yaml";

/// Per-user config file location, if the platform has a config directory
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("examops").join("config.yaml"))
}

/// Config file to load, or `None` to run on defaults
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE))
        .chain(user_config_path())
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_is_used_even_if_missing() {
        let path = Path::new("/nonexistent/examops.yaml");
        assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn user_config_lives_in_an_examops_folder() {
        if let Some(path) = user_config_path() {
            assert!(path.ends_with("examops/config.yaml"));
        }
    }
}
