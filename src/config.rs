use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_TEXT_MODEL: &str = "mistralai/mistral-small-3.1-24b-instruct:free";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_APP_TITLE: &str = "Recipe Machine";
pub const DEFAULT_DB_PATH: &str = "data/recipes.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
}

/// Settings for the chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_url: String,
    /// Model used for ingredient lists.
    pub text_model: String,
    /// Model used for photos.
    pub vision_model: String,
    /// Sent as `HTTP-Referer` for OpenRouter attribution. The header is left out when unset.
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    pub app_title: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub db_path: PathBuf,
}

impl Config {
    /// Reads the configuration from the environment. Call `dotenv()` first to pick up `.env`.
    ///
    /// Required: `OPENROUTER_API_KEY`.
    /// Optional: `RECIPE_MACHINE_API_URL`, `RECIPE_MACHINE_TEXT_MODEL`,
    /// `RECIPE_MACHINE_VISION_MODEL`, `RECIPE_MACHINE_REFERER`,
    /// `RECIPE_MACHINE_APP_TITLE`, `RECIPE_MACHINE_DB_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("OPENROUTER_API_KEY")
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingEnvVar("OPENROUTER_API_KEY"))?;
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            llm: LlmConfig {
                api_key,
                api_url: or_default("RECIPE_MACHINE_API_URL", DEFAULT_API_URL),
                text_model: or_default("RECIPE_MACHINE_TEXT_MODEL", DEFAULT_TEXT_MODEL),
                vision_model: or_default("RECIPE_MACHINE_VISION_MODEL", DEFAULT_VISION_MODEL),
                referer: lookup("RECIPE_MACHINE_REFERER").filter(|url| !url.is_empty()),
                app_title: or_default("RECIPE_MACHINE_APP_TITLE", DEFAULT_APP_TITLE),
            },
            db_path: PathBuf::from(or_default("RECIPE_MACHINE_DB_PATH", DEFAULT_DB_PATH)),
        })
    }
}
