//! Configuration Vault – reads/writes `~/.memos/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors that can arise while loading or saving the config file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persisted user configuration stored in `~/.memos/config.toml`.
///
/// Both API keys are wiped from memory when the value is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Config {
    /// Base URL of the OpenAI-compatible chat endpoint (without `/v1`).
    #[serde(default = "default_llm_base_url")]
    #[zeroize(skip)]
    pub llm_base_url: String,

    /// Chat model name.
    #[serde(default = "default_model")]
    #[zeroize(skip)]
    pub active_model: String,

    /// Bearer token for the chat endpoint (stored as plain text – the file
    /// is created owner-only).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Base URL of an OpenAI-compatible embeddings endpoint.
    #[serde(default = "default_embedding_url")]
    #[zeroize(skip)]
    pub embedding_url: String,

    /// Bearer token for the embeddings endpoint, when it requires one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub embedding_api_key: String,

    /// Embedding model.  Empty selects the built-in offline hashing embedder.
    #[serde(default)]
    #[zeroize(skip)]
    pub embedding_model: String,

    /// Directory holding the core memory document and the vector database.
    #[serde(default = "default_data_dir")]
    #[zeroize(skip)]
    pub data_dir: PathBuf,

    /// Turns kept in the short-term conversation buffer.
    #[serde(default = "default_buffer_capacity")]
    #[zeroize(skip)]
    pub buffer_capacity: usize,

    /// Completion budget per model call.
    #[serde(default = "default_max_tokens")]
    #[zeroize(skip)]
    pub max_tokens: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("llm_base_url", &self.llm_base_url)
            .field("active_model", &self.active_model)
            .field("api_key", if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" })
            .field("embedding_url", &self.embedding_url)
            .field(
                "embedding_api_key",
                if self.embedding_api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("embedding_model", &self.embedding_model)
            .field("data_dir", &self.data_dir)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai".to_string()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_data_dir() -> PathBuf {
    memos_home().join("data")
}
fn default_buffer_capacity() -> usize {
    memos_memory::buffer::DEFAULT_BUFFER_CAPACITY
}
fn default_max_tokens() -> u32 {
    memos_runtime::llm_driver::DEFAULT_MAX_TOKENS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_base_url: default_llm_base_url(),
            active_model: default_model(),
            api_key: String::new(),
            embedding_url: default_embedding_url(),
            embedding_api_key: String::new(),
            embedding_model: String::new(),
            data_dir: default_data_dir(),
            buffer_capacity: default_buffer_capacity(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Config {
    /// Path of the persisted core memory document.
    pub fn core_memory_path(&self) -> PathBuf {
        self.data_dir.join("core_memory.json")
    }

    /// Path of the SQLite vector database.
    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("vectors.sqlite3")
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// `~/.memos`
fn memos_home() -> PathBuf {
    PathBuf::from(home_dir()).join(".memos")
}

/// Return the path to `~/.memos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".memos").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ConfigError> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: Config = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MEMOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MEMOS_LLM_URL` | `llm_base_url` |
/// | `MEMOS_MODEL` | `active_model` |
/// | `MEMOS_API_KEY` | `api_key` |
/// | `MEMOS_EMBEDDING_API_KEY` | `embedding_api_key` |
/// | `MEMOS_DATA_DIR` | `data_dir` |
/// | `MEMOS_BUFFER_CAPACITY` | `buffer_capacity` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MEMOS_LLM_URL") {
        cfg.llm_base_url = v;
    }
    if let Ok(v) = std::env::var("MEMOS_MODEL") {
        cfg.active_model = v;
    }
    if let Ok(v) = std::env::var("MEMOS_API_KEY") {
        cfg.api_key.zeroize();
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("MEMOS_EMBEDDING_API_KEY") {
        cfg.embedding_api_key.zeroize();
        cfg.embedding_api_key = v;
    }
    if let Ok(v) = std::env::var("MEMOS_DATA_DIR") {
        cfg.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("MEMOS_BUFFER_CAPACITY")
        && let Ok(n) = v.parse::<usize>()
        && n > 0
    {
        cfg.buffer_capacity = n;
    }
}

/// Save the config to disk, creating `~/.memos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_api_key() {
        let mut cfg = Config::default();
        cfg.api_key = "gsk-super-secret".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("gsk-super-secret"), "key must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_redacts_embedding_api_key() {
        let mut cfg = Config::default();
        cfg.embedding_api_key = "sk-embed-secret".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("sk-embed-secret"));
        assert!(debug_str.contains("embedding_api_key: \"<redacted>\""));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_key() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn zeroize_clears_only_the_secret() {
        let mut cfg = Config::default();
        cfg.api_key = "gsk-super-secret".to_string();
        cfg.embedding_api_key = "sk-embed-secret".to_string();
        cfg.zeroize();
        assert!(cfg.api_key.is_empty());
        assert!(cfg.embedding_api_key.is_empty());
        assert_eq!(cfg.active_model, "llama-3.3-70b-versatile");
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.active_model, "llama-3.3-70b-versatile");
        assert_eq!(loaded.buffer_capacity, 10);
        assert_eq!(loaded.max_tokens, 1024);
        assert!(loaded.embedding_model.is_empty());
    }

    #[test]
    fn empty_api_key_is_not_written() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("api_key"));
        assert!(!raw.contains("embedding_api_key"));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("active_model = \"gpt-4o-mini\"\n").unwrap();
        assert_eq!(cfg.active_model, "gpt-4o-mini");
        assert_eq!(cfg.llm_base_url, "https://api.groq.com/openai");
        assert!(cfg.data_dir.ends_with("data"));
    }

    #[test]
    fn data_paths_live_under_data_dir() {
        let mut cfg = Config::default();
        cfg.data_dir = PathBuf::from("/tmp/memos-test");
        assert_eq!(cfg.core_memory_path(), PathBuf::from("/tmp/memos-test/core_memory.json"));
        assert_eq!(cfg.vector_db_path(), PathBuf::from("/tmp/memos-test/vectors.sqlite3"));
    }

    #[test]
    fn config_path_points_to_memos_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".memos"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "buffer_capacity = \"ten\"").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Parse(_))));
    }

    // Env-var overrides share process state, so they are exercised in one test.
    #[test]
    fn apply_env_overrides_reads_memos_vars() {
        // SAFETY: no other test reads or writes these variables.
        unsafe {
            std::env::set_var("MEMOS_LLM_URL", "http://localhost:11434");
            std::env::set_var("MEMOS_MODEL", "llama3.1");
            std::env::set_var("MEMOS_API_KEY", "from-env");
            std::env::set_var("MEMOS_EMBEDDING_API_KEY", "embed-from-env");
            std::env::set_var("MEMOS_DATA_DIR", "/var/lib/memos");
            std::env::set_var("MEMOS_BUFFER_CAPACITY", "0");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.llm_base_url, "http://localhost:11434");
        assert_eq!(cfg.active_model, "llama3.1");
        assert_eq!(cfg.api_key, "from-env");
        assert_eq!(cfg.embedding_api_key, "embed-from-env");
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/memos"));
        assert_eq!(cfg.buffer_capacity, 10, "zero capacity is ignored");
        unsafe {
            for var in [
                "MEMOS_LLM_URL",
                "MEMOS_MODEL",
                "MEMOS_API_KEY",
                "MEMOS_EMBEDDING_API_KEY",
                "MEMOS_DATA_DIR",
                "MEMOS_BUFFER_CAPACITY",
            ] {
                std::env::remove_var(var);
            }
        }
    }
}
