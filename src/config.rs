// src/config.rs

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use std::{fs, path::Path};

use crate::error::ConfigError;
use crate::prompt::PromptOptions;
use crate::reconcile::DEFAULT_TOLERANCE;
use crate::retry::{ExtractionPolicy, RetryPolicy};
use crate::schema::SchemaSpec;
use crate::validate::ValidationPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub validation: ValidationSection,
    /// Custom schema; the built-in invoice schema when omitted.
    #[serde(default)]
    pub schema: Option<SchemaSpec>,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "verdicts/verdicts.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmSection::default(),
            validation: ValidationSection::default(),
            schema: None,
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Ollama,
    Remote,
    Heuristics,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "remote" => Ok(Self::Remote),
            "heuristics" => Ok(Self::Heuristics),
            other => Err(format!(
                "unknown backend '{other}' (expected ollama, remote or heuristics)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointSection {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "default_ollama")]
    pub ollama: EndpointSection,
    #[serde(default = "default_remote")]
    pub remote: EndpointSection,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_ollama() -> EndpointSection {
    EndpointSection {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen3:8b".to_string(),
    }
}

fn default_remote() -> EndpointSection {
    EndpointSection {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_chars() -> usize {
    PromptOptions::default().max_chars
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            ollama: default_ollama(),
            remote: default_remote(),
            timeout_secs: default_timeout_secs(),
            temperature: 0.0,
            max_chars: default_max_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// 0 disables the date plausibility check.
    #[serde(default = "default_max_date_skew_years")]
    pub max_date_skew_years: u32,
}

fn default_tolerance() -> Decimal {
    DEFAULT_TOLERANCE
}

fn default_retry_budget() -> u32 {
    2
}

fn default_max_date_skew_years() -> u32 {
    10
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            retry_budget: default_retry_budget(),
            max_date_skew_years: default_max_date_skew_years(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// `load`, or the defaults when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn schema(&self) -> SchemaSpec {
        self.schema.clone().unwrap_or_else(SchemaSpec::invoice_default)
    }

    pub fn policy(&self) -> ExtractionPolicy {
        let skew = self.validation.max_date_skew_years;
        ExtractionPolicy {
            validation: ValidationPolicy {
                tolerance: self.validation.tolerance,
                max_date_skew_years: (skew > 0).then_some(skew),
            },
            retry: RetryPolicy {
                retry_budget: self.validation.retry_budget,
                call_timeout: Duration::from_secs(self.llm.timeout_secs),
            },
            prompt: PromptOptions {
                max_chars: self.llm.max_chars,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::Ollama);
        assert_eq!(cfg.db_path, "verdicts/verdicts.db");
        assert_eq!(cfg.policy(), ExtractionPolicy::default());
        assert_eq!(cfg.schema(), SchemaSpec::invoice_default());
    }

    #[test]
    fn test_full_config() {
        let cfg = Config::from_toml(
            r#"
            db_path = "/tmp/v.db"

            [llm]
            backend = "remote"
            timeout_secs = 30
            max_chars = 4000

            [llm.remote]
            base_url = "https://llm.example.com/v1"
            model = "large"

            [validation]
            tolerance = "0.05"
            retry_budget = 1
            max_date_skew_years = 0

            [schema]
            [[schema.fields]]
            name = "invoice_number"
            type = "string"
            required = true
            role = "identifier"

            [[schema.fields]]
            name = "total"
            type = "currency-amount"
            required = true
            role = "aggregate-amount"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.llm.backend, LlmBackend::Remote);
        assert_eq!(cfg.llm.remote.model, "large");
        assert_eq!(cfg.llm.ollama, default_ollama());

        let policy = cfg.policy();
        assert_eq!(policy.validation.tolerance, Decimal::new(5, 2));
        assert_eq!(policy.validation.max_date_skew_years, None);
        assert_eq!(policy.retry.retry_budget, 1);
        assert_eq!(policy.retry.call_timeout, Duration::from_secs(30));
        assert_eq!(policy.prompt.max_chars, 4000);
        assert_eq!(cfg.schema().fields().len(), 2);
    }

    #[test]
    fn test_invalid_schema_is_config_error() {
        let err = Config::from_toml(
            r#"
            [[schema.fields]]
            name = "total"
            type = "currency-amount"
            role = "aggregate-amount"

            [[schema.rules]]
            expr = "total = subtotal"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("subtotal"));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Heuristics".parse::<LlmBackend>(), Ok(LlmBackend::Heuristics));
        assert!("gpt".parse::<LlmBackend>().is_err());
    }
}
