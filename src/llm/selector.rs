use super::client::LLMClient;
use super::error::BackendError;
use super::genai::GenAIClient;
use crate::config::ArgusConfig;
use genai::adapter::AdapterKind;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the client for the `llm.<name>` entry of the configuration
pub fn client_from_config(
    config: &ArgusConfig,
    name: &str,
) -> Result<Arc<dyn LLMClient>, BackendError> {
    let entry = config
        .llm_config(name)
        .ok_or_else(|| BackendError::ConfigurationError {
            message: format!("No llm entry named '{}'", name),
        })?;

    let provider_name = entry.provider_name(name);
    let provider = parse_provider(provider_name)?;

    if !provider_has_credentials(provider, &entry.api_key) {
        warn!(
            provider = provider_name,
            env = %entry.api_key,
            "No API key found in the environment; requests will fail to authenticate"
        );
    }

    let api_key_env = (!entry.api_key.is_empty()).then(|| entry.api_key.clone());
    let client = GenAIClient::new(provider, entry.model.clone(), entry.timeout(), api_key_env)?;
    info!("Using {} ({})", provider, entry.model);
    Ok(Arc::new(client))
}

fn parse_provider(name: &str) -> Result<AdapterKind, BackendError> {
    AdapterKind::from_lower_str(&name.to_lowercase()).ok_or_else(|| {
        BackendError::ConfigurationError {
            message: format!("Unknown provider '{}'", name),
        }
    })
}

/// Check if provider has available credentials
fn provider_has_credentials(provider: AdapterKind, api_key_env: &str) -> bool {
    let var = if api_key_env.is_empty() {
        provider.default_key_env_name()
    } else {
        Some(api_key_env)
    };
    match var {
        None => true,
        Some(env_var) => std::env::var(env_var).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_credentials_check() {
        assert!(provider_has_credentials(AdapterKind::Ollama, ""));
        assert!(!provider_has_credentials(
            AdapterKind::Anthropic,
            "ARGUS_TEST_KEY_THAT_IS_NEVER_SET"
        ));
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(parse_provider("Gemini").unwrap(), AdapterKind::Gemini);
        assert!(parse_provider("nonsense").is_err());
    }

    #[test]
    fn test_client_from_default_config() {
        let config = ArgusConfig::default();
        let client = client_from_config(&config, "gemini").unwrap();
        assert_eq!(client.name(), "Gemini");

        assert!(client_from_config(&config, "missing").is_err());
    }
}
