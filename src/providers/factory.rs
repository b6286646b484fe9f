//! Builds `Arc<dyn Provider>` instances from [`crate::config::ProviderConfigs`].
//!
//! Unlike a fixed vendor priority chain, every entry in `providers.entries`
//! that resolves to a usable credential is constructed; the registry (C1)
//! decides routing afterward. An entry is skipped (with a warning, not an
//! error) rather than failing startup, since a single misconfigured
//! provider shouldn't take the whole gateway down.

use anyhow::Result;
use std::sync::Arc;

use super::{OpenAIProvider, Provider};
use crate::config::{ProviderConfig, ProviderConfigs, ProviderKind};

/// Construct one provider per usable entry in `configs`. OAuth-kind entries
/// are skipped here — they're resolved through the credential manager (C9)
/// and registered separately once a live token is available.
pub fn build_providers(configs: &ProviderConfigs) -> Result<Vec<Arc<dyn Provider>>> {
    let mut providers = Vec::new();
    for config in configs.entries.values() {
        match try_build_one(config) {
            Ok(Some(p)) => providers.push(p),
            Ok(None) => {
                tracing::warn!(provider = %config.name, "skipping provider: oauth credentials not resolved at startup");
            }
            Err(e) => {
                tracing::warn!(provider = %config.name, error = %e, "failed to construct provider, skipping");
            }
        }
    }
    if providers.is_empty() {
        anyhow::bail!("no provider configured\n\nAdd at least one entry under PROVIDER_CONFIGS_DIR.");
    }
    Ok(providers)
}

fn try_build_one(config: &ProviderConfig) -> Result<Option<Arc<dyn Provider>>> {
    match config.kind {
        ProviderKind::OAuth => Ok(None),
        ProviderKind::Free => {
            let default_model = config.default_model.clone().unwrap_or_else(|| "default".to_string());
            Ok(Some(Arc::new(OpenAIProvider::local(
                config.name.clone(),
                config.base_url.clone(),
                default_model,
            ))))
        }
        ProviderKind::ApiKey => {
            let Some(api_key) = &config.api_key else {
                anyhow::bail!("provider {} is api_key-kind but has no api_key configured", config.name);
            };
            let default_model = config.default_model.clone().unwrap_or_else(|| "gpt-4-turbo-preview".to_string());
            Ok(Some(Arc::new(OpenAIProvider::new(
                config.name.clone(),
                api_key.expose_secret().to_string(),
                config.base_url.clone(),
                default_model,
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretString;
    use std::collections::HashMap;

    fn api_key_config(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind: ProviderKind::ApiKey,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: Some(SecretString::new("sk-test".to_string())),
            default_model: None,
            weight: 1.0,
        }
    }

    #[test]
    fn builds_one_provider_per_entry() {
        let mut entries = HashMap::new();
        entries.insert("openai".to_string(), api_key_config("openai"));
        let configs = ProviderConfigs { entries };
        let providers = build_providers(&configs).expect("should build");
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].id(), "openai");
    }

    #[test]
    fn errors_when_no_providers_configured() {
        let configs = ProviderConfigs::default();
        assert!(build_providers(&configs).is_err());
    }

    #[test]
    fn skips_oauth_providers_without_failing() {
        let mut entries = HashMap::new();
        entries.insert(
            "claude-oauth".to_string(),
            ProviderConfig {
                name: "claude-oauth".to_string(),
                kind: ProviderKind::OAuth,
                base_url: "https://api.anthropic.com/v1".to_string(),
                api_key: None,
                default_model: None,
                weight: 1.0,
            },
        );
        entries.insert("openai".to_string(), api_key_config("openai"));
        let configs = ProviderConfigs { entries };
        let providers = build_providers(&configs).expect("should build with at least one provider");
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn api_key_kind_without_key_errors() {
        let mut entries = HashMap::new();
        entries.insert(
            "broken".to_string(),
            ProviderConfig {
                name: "broken".to_string(),
                kind: ProviderKind::ApiKey,
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                default_model: None,
                weight: 1.0,
            },
        );
        let configs = ProviderConfigs { entries };
        assert!(build_providers(&configs).is_err());
    }
}
