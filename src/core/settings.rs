//! Runtime configuration loaded from environment variables.
//!
//! All tuning knobs live here so a deployment can adjust retrieval
//! behavior (relevance threshold, result limit) and database pooling
//! without a code change.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,

    /// Postgres connection string. Empty/absent means the conversation
    /// store starts degraded and the chat path runs without persistence.
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub db_max_overflow: u32,
    pub db_pool_recycle_secs: u64,

    pub cohere_api_key: String,
    pub embedding_model: String,
    /// Vector dimensionality; must match what the embedding model emits.
    pub vector_dim: usize,
    pub embed_timeout_secs: u64,

    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,

    pub gemini_api_key: String,
    pub gemini_model: String,

    /// Minimum similarity score a retrieved chunk must meet to be used as
    /// context. Corpus- and model-dependent; there is no universally
    /// correct value, so it is always deployment configuration.
    pub relevance_threshold: f32,
    /// Pivot of the confidence rescaling curve for the gated endpoint.
    pub confidence_floor: f32,
    pub result_limit: usize,
    pub max_message_length: usize,

    pub allowed_origins: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub log_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            port: parse_env("PORT", 8000),
            database_url: non_empty(env::var("DATABASE_URL").ok()),
            db_pool_size: parse_env("DB_POOL_SIZE", 5),
            db_max_overflow: parse_env("DB_MAX_OVERFLOW", 10),
            db_pool_recycle_secs: parse_env("DB_POOL_RECYCLE", 3600),
            cohere_api_key: env::var("COHERE_API_KEY").unwrap_or_default(),
            embedding_model: env_or("EMBEDDING_MODEL", "embed-multilingual-v3.0"),
            vector_dim: parse_env("EMBEDDING_DIM", 1024),
            embed_timeout_secs: parse_env("EMBED_TIMEOUT_SECS", 30),
            qdrant_url: env::var("QDRANT_URL").unwrap_or_default(),
            qdrant_api_key: non_empty(env::var("QDRANT_API_KEY").ok()),
            qdrant_collection: env_or("QDRANT_COLLECTION_NAME", "textbook_rag"),
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env_or("GEMINI_MODEL", "gemini-2.5-flash"),
            relevance_threshold: parse_env("RELEVANCE_THRESHOLD", 0.25),
            confidence_floor: parse_env("CONFIDENCE_FLOOR", 0.3),
            result_limit: parse_env("RESULT_LIMIT", 5),
            max_message_length: parse_env("MAX_MESSAGE_LENGTH", 1000),
            allowed_origins: parse_origins(&env_or("ALLOWED_ORIGINS", "*")),
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", 100),
            log_dir: PathBuf::from(env_or("LOG_DIR", "./logs")),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `"*"` allows any origin; otherwise a comma-separated origin list.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_split_and_trim() {
        let origins = parse_origins("http://localhost:3000, https://example.com ,");
        assert_eq!(
            origins,
            vec![
                "http://localhost:3000".to_string(),
                "https://example.com".to_string()
            ]
        );
    }

    #[test]
    fn wildcard_origin_is_kept_as_is() {
        assert_eq!(parse_origins("*"), vec!["*".to_string()]);
    }

    #[test]
    fn empty_values_are_treated_as_unset() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(
            non_empty(Some("postgres://db".to_string())),
            Some("postgres://db".to_string())
        );
    }
}
