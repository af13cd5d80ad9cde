//! Configuration lookup.
//!
//! A tight reader for git's ini-like files: `[section]` and
//! `[section "subsection"]` headers, `key = value` pairs, `#`/`;`
//! comments, backslash line continuation. Keys are matched
//! case-insensitively on section and key (subsections are case
//! sensitive); across layered files the last assignment wins.

mod file;

pub use file::parse_file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Errors from configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}:{line}: cannot parse: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Layered configuration: later files shadow earlier ones.
#[derive(Debug, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the files relevant to a repository, least specific first:
    /// `$XDG_CONFIG_HOME/git/config` (or `$HOME/.config/git/config`),
    /// `$HOME/.gitconfig`, then `<gitdir>/config`. Missing files are
    /// skipped; an unreadable or unparsable *user-level* file is ignored,
    /// while the repository's own config must parse.
    pub fn load(git_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Some(xdg) = xdg_config_path() {
            let _ = config.add_file_if_exists(&xdg);
        }
        if let Some(home) = std::env::var_os("HOME") {
            let _ = config.add_file_if_exists(&Path::new(&home).join(".gitconfig"));
        }
        if let Some(git_dir) = git_dir {
            config.add_file_if_exists(&git_dir.join("config"))?;
        }

        Ok(config)
    }

    /// Parse one file into this configuration, shadowing earlier values.
    pub fn add_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        for (key, value) in parse_file(path)? {
            self.values.insert(key, value);
        }
        Ok(())
    }

    fn add_file_if_exists(&mut self, path: &Path) -> Result<(), ConfigError> {
        if path.is_file() {
            self.add_file(path)?;
        }
        Ok(())
    }

    /// Set a value directly (tests and overrides).
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(normalize_key(key), value.to_string());
    }

    /// Look up a string value by `section.key` or `section.sub.key`.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(|s| s.as_str())
    }

    /// Look up a boolean using git's grammar: true/yes/on/1 and
    /// false/no/off/0 (case-insensitive); a key set with no value is true.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.get_string(key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "" | "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Boolean lookup with a default for missing keys.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        Ok(self.get_bool(key)?.unwrap_or(default))
    }

    /// Look up a path value.
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_string(key).map(PathBuf::from)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Lowercase section and key; a quoted subsection component keeps its case.
fn normalize_key(key: &str) -> String {
    let parts: Vec<&str> = key.split('.').collect();
    match parts.len() {
        0 | 1 => key.to_ascii_lowercase(),
        2 => format!(
            "{}.{}",
            parts[0].to_ascii_lowercase(),
            parts[1].to_ascii_lowercase()
        ),
        _ => {
            let section = parts[0].to_ascii_lowercase();
            let last = parts[parts.len() - 1].to_ascii_lowercase();
            let middle = parts[1..parts.len() - 1].join(".");
            format!("{section}.{middle}.{last}")
        }
    }
}

fn xdg_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(Path::new(&xdg).join("git/config"));
    }
    std::env::var_os("HOME").map(|home| Path::new(&home).join(".config/git/config"))
}
