//! Configuration for the local deployment.
//!
//! Process-level settings come from the environment (and an optional `.env`).
//! User-facing settings (output folder, compute backend, donation prompt) live
//! in the key-value store, see `application::status::StatusStore`.

use std::env;
use std::path::PathBuf;

/// Prefix used for per-job workspaces under the temp root, and by the orphan sweep.
pub const TMP_PREFIX: &str = "StemRoller-";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// JSON file backing the key-value store
    pub store_path: PathBuf,
    /// Root of the bundled third-party tools, if the build ships them
    pub third_party_dir: Option<PathBuf>,
    /// Application-local model repository passed to the separation tool
    pub models_dir: Option<PathBuf>,
    /// URL template for remote sources; `{id}` is replaced by the job id
    pub source_url_template: String,
    /// Temp root for workspaces; defaults to the system temp dir
    pub tmp_dir: PathBuf,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("3000")),
            store_path: env::var("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_store_path()),
            third_party_dir: existing_dir("THIRD_PARTY_DIR"),
            models_dir: existing_dir("MODELS_DIR"),
            source_url_template: env::var("SOURCE_URL_TEMPLATE")
                .unwrap_or_else(|_| String::from("{id}")),
            tmp_dir: env::var("TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
        }
    }

    /// Executable name and PATH entries for the bundled tools.
    pub fn tools(&self) -> ToolPaths {
        match &self.third_party_dir {
            Some(dir) => ToolPaths {
                separator: String::from("demucs-cxfreeze"),
                mixer: String::from("ffmpeg"),
                search_path: Some(vec![dir.join("demucs-cxfreeze"), dir.join("ffmpeg").join("bin")]),
            },
            None => ToolPaths::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolPaths {
    pub separator: String,
    pub mixer: String,
    /// Replaces the host PATH for child processes when set.
    pub search_path: Option<Vec<PathBuf>>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            separator: String::from("demucs"),
            mixer: String::from("ffmpeg"),
            search_path: None,
        }
    }
}

/// Default location of the user's output folder.
pub fn default_output_path() -> PathBuf {
    home_dir().join("Music").join("StemRoller")
}

fn default_store_path() -> PathBuf {
    home_dir().join(".stemq").join("config.json")
}

fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn existing_dir(var: &str) -> Option<PathBuf> {
    env::var(var)
        .ok()
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
}
