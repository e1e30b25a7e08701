// Linkshelf platform paths
// Resolves where settings and the local database live on each OS.

use std::env;
use std::path::PathBuf;

/// Overrides the data directory on every platform.
pub const ENV_DATA_DIR: &str = "LINKSHELF_DATA_DIR";

#[cfg(not(target_os = "windows"))]
fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}

/// Returns the platform-specific configuration directory for Linkshelf.
///
/// - **Linux**: `$XDG_CONFIG_HOME/linkshelf` or `~/.config/linkshelf`
/// - **macOS**: `~/Library/Application Support/Linkshelf`
/// - **Windows**: `%APPDATA%/Linkshelf`
pub fn get_config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA")
            .unwrap_or_else(|_| String::from("C:\\Users\\Default\\AppData\\Roaming"));
        PathBuf::from(appdata).join("Linkshelf")
    }
    #[cfg(target_os = "macos")]
    {
        home_dir()
            .join("Library")
            .join("Application Support")
            .join("Linkshelf")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join("linkshelf"),
            _ => home_dir().join(".config").join("linkshelf"),
        }
    }
}

/// Returns the directory holding the local database.
///
/// `$LINKSHELF_DATA_DIR` wins when set; otherwise `$XDG_DATA_HOME/linkshelf`
/// or `~/.local/share/linkshelf` on Linux, and the config directory elsewhere.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = env::var(ENV_DATA_DIR) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    #[cfg(any(target_os = "windows", target_os = "macos"))]
    {
        get_config_dir()
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        match env::var("XDG_DATA_HOME") {
            Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join("linkshelf"),
            _ => home_dir().join(".local").join("share").join("linkshelf"),
        }
    }
}
