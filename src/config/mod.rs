pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, parse_config, ConfigError};
pub use types::Config;

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")?;

    Ok(re
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string())
}

/// Expands tilde (~) in paths to the user's home directory.
/// Returns the path unchanged if it doesn't start with tilde or home directory cannot be determined.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/logpull/config.yml
/// 3. /etc/logpull/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

pub const SYSTEM_CONFIG_PATH: &str = "/etc/logpull/config.yml";

pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/logpull/config.yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_expand_env_vars_single() {
        std::env::set_var("LOGPULL_TEST_VAR", "test_value");
        let result = expand_env_vars("path/$env{LOGPULL_TEST_VAR}/file").unwrap();
        assert_eq!(result, "path/test_value/file");
        std::env::remove_var("LOGPULL_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_multiple() {
        std::env::set_var("LOGPULL_VAR1", "value1");
        std::env::set_var("LOGPULL_VAR2", "value2");
        let result = expand_env_vars("$env{LOGPULL_VAR1}/middle/$env{LOGPULL_VAR2}").unwrap();
        assert_eq!(result, "value1/middle/value2");
        std::env::remove_var("LOGPULL_VAR1");
        std::env::remove_var("LOGPULL_VAR2");
    }

    #[test]
    fn test_expand_env_vars_unset() {
        let result = expand_env_vars("path/$env{LOGPULL_NONEXISTENT_VAR}/file").unwrap();
        // Unset variables are left unchanged
        assert_eq!(result, "path/$env{LOGPULL_NONEXISTENT_VAR}/file");
    }

    #[test]
    fn test_expand_env_vars_ignores_shell_syntax() {
        let result = expand_env_vars("${HOME}:$HOME").unwrap();
        assert_eq!(result, "${HOME}:$HOME");
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let expanded = expand_tilde(Path::new("~/test/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("test/path"));
        }
    }

    #[test]
    fn test_expand_tilde_alone() {
        let expanded = expand_tilde(Path::new("~"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home);
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        assert_eq!(
            expand_tilde(Path::new("/absolute/path")),
            Path::new("/absolute/path")
        );
        assert_eq!(
            expand_tilde(Path::new("relative/path")),
            Path::new("relative/path")
        );
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/opt/logpull.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/opt/logpull.yml")));
    }
}
