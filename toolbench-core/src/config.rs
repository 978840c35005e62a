// toolbench-core/src/config.rs

//! Configuration structures and parsing for `Toolbench.toml`.

use crate::errors::HarnessError;
use crate::handler::{BackendProfile, Capabilities, HandlerConfig};
use crate::invoker::RetryPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const CONFIG_FILE_NAME: &str = "Toolbench.toml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub capabilities: CapabilityOverrides,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub extra_body: Option<toml::Value>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub profile: BackendProfile,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub strip_fc_suffix: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    600
}

/// Per-flag overrides of the profile's capabilities.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityOverrides {
    pub structured_tool_calls: Option<bool>,
    pub structured_reasoning: Option<bool>,
    pub streaming_with_tools: Option<bool>,
}

impl CapabilityOverrides {
    pub fn apply(&self, base: Capabilities) -> Capabilities {
        Capabilities {
            structured_tool_calls: self.structured_tool_calls.unwrap_or(base.structured_tool_calls),
            structured_reasoning: self.structured_reasoning.unwrap_or(base.structured_reasoning),
            streaming_with_tools: self.streaming_with_tools.unwrap_or(base.streaming_with_tools),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(content: &str) -> Result<HarnessConfig, HarnessError> {
        let config: HarnessConfig = match toml::from_str(content) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse TOML content");
                return Err(HarnessError::config(format!(
                    "failed to parse configuration TOML: {e}"
                )));
            }
        };
        config.validate()?;
        tracing::debug!(
            model = %config.endpoint.model,
            profile = %config.endpoint.profile,
            "Parsed and validated configuration"
        );
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<HarnessConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        HarnessConfig::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {:?}", path))
    }

    fn validate(&self) -> Result<(), HarnessError> {
        let endpoint = &self.endpoint;
        if endpoint.base_url.trim().is_empty() {
            return Err(HarnessError::config("'endpoint.base_url' is empty."));
        }
        let url = Url::parse(&endpoint.base_url).map_err(|e| {
            HarnessError::config(format!(
                "Invalid URL format for 'endpoint.base_url' ('{}'): {e}",
                endpoint.base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HarnessError::config(format!(
                "'endpoint.base_url' must use http or https, got '{}'.",
                url.scheme()
            )));
        }
        if endpoint.model.trim().is_empty() {
            return Err(HarnessError::config("'endpoint.model' is empty."));
        }
        if let Some(var) = &endpoint.api_key_env_var {
            if var.trim().is_empty() {
                return Err(HarnessError::config("'endpoint.api_key_env_var' is empty."));
            }
        }
        if let Some(temperature) = endpoint.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(HarnessError::config(format!(
                    "'endpoint.temperature' must be between 0 and 2, got {temperature}."
                )));
            }
        }
        if endpoint.request_timeout_secs == 0 {
            return Err(HarnessError::config("'endpoint.request_timeout_secs' must be positive."));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(HarnessError::config("'retry.max_attempts' must be at least 1."));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(HarnessError::config(format!(
                "'retry.multiplier' must be a finite number >= 1, got {}.",
                retry.multiplier
            )));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(HarnessError::config(
                "'retry.base_delay_ms' must not exceed 'retry.max_delay_ms'.",
            ));
        }

        if let Some(extra) = &self.extra_body {
            if !extra.is_table() {
                return Err(HarnessError::config(
                    "'extra_body' must be a TOML table.",
                ));
            }
        }
        Ok(())
    }

    /// `[extra_body]` as JSON request fields.
    pub fn extra_body_json(&self) -> Result<Map<String, JsonValue>, HarnessError> {
        let Some(extra) = &self.extra_body else {
            return Ok(Map::new());
        };
        match serde_json::to_value(extra) {
            Ok(JsonValue::Object(map)) => Ok(map),
            Ok(_) => Err(HarnessError::config("'extra_body' must be a TOML table.")),
            Err(e) => Err(HarnessError::config(format!(
                "Failed to convert 'extra_body' to JSON: {e}"
            ))),
        }
    }

    /// Builds the handler configuration. The API key is resolved by the
    /// caller.
    pub fn handler_config(
        &self,
        api_key: impl Into<String>,
    ) -> Result<HandlerConfig, HarnessError> {
        let endpoint = &self.endpoint;
        let mut config = HandlerConfig::new(
            endpoint.base_url.clone(),
            api_key,
            endpoint.model.clone(),
            endpoint.profile,
        );
        config.temperature = endpoint.temperature;
        config.capabilities = self.capabilities.apply(endpoint.profile.capabilities());
        config.stream = endpoint.stream;
        config.strip_fc_suffix = endpoint.strip_fc_suffix;
        config.extra_body = self.extra_body_json()?;
        config.retry = self.retry.policy();
        config.request_timeout = Duration::from_secs(endpoint.request_timeout_secs);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid_config_content() -> String {
        r#"
            system_prompt = "You are a function-calling assistant."

            [endpoint]
            base_url = "http://localhost:8000/v1"
            model = "Qwen3-4B-Thinking-2507-FC"
            api_key_env_var = "LLAMAFACTORY_API_KEY"
            temperature = 0.6
            profile = "llama-factory-reasoning"
            stream = true
            strip_fc_suffix = true

            [capabilities]
            streaming_with_tools = true

            [retry]
            max_attempts = 3
            base_delay_ms = 500

            [extra_body]
            top_k = 20
            chat_template_kwargs = { enable_thinking = true }
        "#
        .to_string()
    }

    fn assert_config_error(content: &str, needle: &str) {
        match HarnessConfig::from_toml_str(content) {
            Err(HarnessError::Config(msg)) => {
                assert!(msg.contains(needle), "error '{msg}' does not mention '{needle}'")
            }
            other => panic!("expected a config error mentioning '{needle}', got {other:?}"),
        }
    }

    #[test]
    fn parses_full_config() {
        let config = HarnessConfig::from_toml_str(&valid_config_content()).unwrap();
        assert_eq!(config.endpoint.profile, BackendProfile::LlamaFactoryReasoning);
        assert_eq!(config.endpoint.request_timeout_secs, 600);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(
            config.system_prompt.as_deref(),
            Some("You are a function-calling assistant.")
        );

        let handler = config.handler_config("EMPTY").unwrap();
        assert_eq!(handler.served_model_name(), "Qwen3-4B-Thinking-2507");
        assert_eq!(handler.temperature, Some(0.6));
        assert!(handler.capabilities.streaming_with_tools);
        assert!(handler.capabilities.structured_reasoning);
        assert_eq!(handler.retry.base_delay, Duration::from_millis(500));
        assert_eq!(handler.extra_body["top_k"], json!(20));
        assert_eq!(
            handler.extra_body["chat_template_kwargs"],
            json!({ "enable_thinking": true })
        );
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [endpoint]
            base_url = "https://api.example.com/v1"
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint.profile, BackendProfile::OpenAi);
        assert_eq!(config.endpoint.api_key_env_var, None);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(config.extra_body_json().unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_values() {
        let endpoint = |body: &str| format!("[endpoint]\n{body}\n");
        assert_config_error(
            &endpoint("base_url = \"http://localhost:8000/v1\"\nmodel = \"  \""),
            "endpoint.model",
        );
        assert_config_error(
            &endpoint("base_url = \"not a url\"\nmodel = \"m\""),
            "Invalid URL",
        );
        assert_config_error(
            &endpoint("base_url = \"ftp://example.com\"\nmodel = \"m\""),
            "http or https",
        );
        assert_config_error(
            &endpoint("base_url = \"http://h/v1\"\nmodel = \"m\"\ntemperature = 3.5"),
            "temperature",
        );
        assert_config_error(
            &format!(
                "{}[retry]\nmax_attempts = 0\n",
                endpoint("base_url = \"http://h/v1\"\nmodel = \"m\"")
            ),
            "max_attempts",
        );
        assert_config_error(
            &format!(
                "{}[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 100\n",
                endpoint("base_url = \"http://h/v1\"\nmodel = \"m\"")
            ),
            "base_delay_ms",
        );
        assert_config_error(
            "extra_body = 3\n[endpoint]\nbase_url = \"http://h/v1\"\nmodel = \"m\"\n",
            "extra_body",
        );
        assert_config_error(
            &endpoint("base_url = \"http://h/v1\"\nmodel = \"m\"\nprofile = \"vllm\""),
            "parse",
        );
        assert_config_error("[retry]\nmax_attempts = 2\n", "parse");
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", valid_config_content()).unwrap();
        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.endpoint.model, "Qwen3-4B-Thinking-2507-FC");

        let missing = file.path().with_extension("missing");
        let err = HarnessConfig::load(&missing).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
