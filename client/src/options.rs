use anyhow::{anyhow, Result};
use common::Config;

/// Connection settings for the serving endpoint.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_base_url: String,
    pub model_name: String,
    pub api_token: Option<String>,
}

impl Config for ClientOptions {
    fn load(config: &common::ConfigLoader) -> Result<Self> {
        Ok(Self {
            api_base_url: config
                .get("api_base_url")
                .and_then(|v| v.as_string())
                .unwrap_or_else(|| "http://localhost:40000".to_string()),
            model_name: config
                .get("model_name")
                .and_then(|v| v.as_string())
                .ok_or_else(|| anyhow!("model_name must be configured"))?,
            api_token: config.get("api_token").and_then(|v| v.as_string()),
        })
    }
}
