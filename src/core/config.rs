use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::errors::PipelineError;

/// Filesystem layout for the service: data dir, log dir, blob areas and
/// the sqlite database that backs both metadata and embeddings.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub incoming_dir: PathBuf,
    pub organized_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        Self::rooted_at(data_dir)
    }

    /// Build a layout under an explicit root. Tests point this at a
    /// scratch directory.
    pub fn rooted_at(data_dir: PathBuf) -> Self {
        let log_dir = data_dir.join("logs");
        let db_path = data_dir.join("docrouter.db");
        let incoming_dir = data_dir.join("incoming");
        let organized_dir = data_dir.join("organized");

        for dir in [&data_dir, &log_dir, &incoming_dir, &organized_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            log_dir,
            db_path,
            incoming_dir,
            organized_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("DOCROUTER_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        return env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("data");
    }

    let xdg = env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        home_dir().join(".local/share").to_string_lossy().to_string()
    });
    PathBuf::from(xdg).join("docrouter")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Typed service settings, loaded from `config.toml` in the data dir (or
/// `DOCROUTER_CONFIG_PATH`) with serde defaults for every field, then a
/// couple of env overrides for the model endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub pipeline: PipelineSettings,
    pub chat: ChatSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub generate_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_upload_bytes: usize,
    pub max_document_chars: usize,
    pub chunk_size_words: usize,
    pub chunk_overlap_words: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub top_k: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings::default(),
            model: ModelSettings::default(),
            pipeline: PipelineSettings::default(),
            chat: ChatSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        ModelSettings {
            base_url: "http://127.0.0.1:1234".to_string(),
            chat_model: "default".to_string(),
            embedding_model: "text-embedding".to_string(),
            embedding_dim: 1024,
            generate_timeout_secs: 8,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            max_upload_bytes: 10 * 1024 * 1024,
            max_document_chars: 20_000,
            chunk_size_words: 256,
            chunk_overlap_words: 20,
            max_attempts: 3,
            retry_backoff_ms: 250,
            queue_depth: 64,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        ChatSettings { top_k: 5 }
    }
}

impl Settings {
    pub fn load(paths: &AppPaths) -> Result<Self, PipelineError> {
        let config_path = config_path(paths);
        let mut settings = if config_path.exists() {
            let contents = fs::read_to_string(&config_path).map_err(PipelineError::storage)?;
            toml::from_str(&contents)
                .map_err(|err| PipelineError::Config(format!("invalid config.toml: {err}")))?
        } else {
            Settings::default()
        };

        if let Ok(url) = env::var("DOCROUTER_MODEL_BASE_URL") {
            settings.model.base_url = url;
        }
        if let Ok(model) = env::var("DOCROUTER_EMBEDDING_MODEL") {
            settings.model.embedding_model = model;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.model.embedding_dim == 0 {
            return Err(PipelineError::Config(
                "model.embedding_dim must be non-zero".to_string(),
            ));
        }
        if self.pipeline.chunk_size_words <= self.pipeline.chunk_overlap_words {
            return Err(PipelineError::Config(
                "pipeline.chunk_size_words must exceed chunk_overlap_words".to_string(),
            ));
        }
        if self.chat.top_k == 0 {
            return Err(PipelineError::Config(
                "chat.top_k must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn config_path(paths: &AppPaths) -> PathBuf {
    if let Ok(path) = env::var("DOCROUTER_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    paths.data_dir.join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.chat.top_k, 5);
        assert_eq!(settings.pipeline.chunk_size_words, 256);
    }

    #[test]
    fn rejects_overlap_larger_than_window() {
        let mut settings = Settings::default();
        settings.pipeline.chunk_size_words = 10;
        settings.pipeline.chunk_overlap_words = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let settings: Settings = toml::from_str(
            r#"
            [chat]
            top_k = 3

            [model]
            embedding_dim = 8
            "#,
        )
        .unwrap();
        assert_eq!(settings.chat.top_k, 3);
        assert_eq!(settings.model.embedding_dim, 8);
        assert_eq!(settings.pipeline.max_attempts, 3);
    }
}
