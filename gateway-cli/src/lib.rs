//! Shared pieces of the `chat-gateway` binary factored out for testing:
//! the on-disk store path resolution and small formatting helpers the
//! admin subcommands use.

pub mod log_format;

use std::path::PathBuf;

pub const APP_NAME: &str = "chat-gateway";

/// Resolves the encrypted credential store's path: `$XDG_DATA_HOME/chat-gateway/store.db`,
/// falling back to `~/.local/share` when `XDG_DATA_HOME` is unset (same
/// convention `gateway-config` uses for its own config file).
pub fn default_db_path() -> Result<PathBuf, String> {
    let base = cross_xdg::BaseDirs::new().map_err(|e| e.to_string())?;
    let dir = base.data_home().join(APP_NAME);
    std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    Ok(dir.join("store.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_db_path_ends_in_store_db_under_app_dir() {
        let path = default_db_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "store.db");
        assert_eq!(path.parent().unwrap().file_name().unwrap(), APP_NAME);
    }
}
