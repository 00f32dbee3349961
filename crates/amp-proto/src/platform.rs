use std::path::PathBuf;

const APP_DIR: &str = "amp-remote";

/// Environment override for both data and config directories.  Used by
/// packaged builds and by tests that must not touch the user's home.
pub const HOME_ENV: &str = "AMP_REMOTE_HOME";

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV).map(PathBuf::from)
}

pub fn data_dir() -> PathBuf {
    if let Some(dir) = home_override() {
        return dir.join("data");
    }

    // ~/.local/share/amp-remote on macOS too
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(dir) = home_override() {
        return dir;
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}
