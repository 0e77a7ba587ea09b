//! Builds a [`BackendRegistry`] from [`GatewayConfig::backends`]: one entry
//! per configured prefix, each wired to the adapter its shape implies.
//! `local/mock` is always registered so the gateway and its tests can run
//! without any live credentials.

use std::sync::Arc;

use pearl_backends::embedding::{EmbeddingProvider, LocalEmbeddingProvider, RemoteEmbeddingProvider};
use pearl_backends::oauth::{OAuthManager, looks_like_oauth_token};
use pearl_backends::providers::anthropic::AnthropicProvider;
use pearl_backends::providers::local::LocalProvider;
use pearl_backends::providers::mock::MockProvider;
use pearl_backends::providers::openai::OpenAiProvider;
use pearl_backends::{BackendRegistry, RetryPolicy};
use pearl_core::GatewayConfig;

const ANTHROPIC_TOKEN_ENDPOINT: &str = "https://console.anthropic.com/v1/oauth/token";

/// Registers an adapter for every `backends.<prefix>` entry in `config`, plus
/// an always-present `local/mock`. The prefix itself selects the adapter
/// shape: `anthropic`/`anthropic-max` get the Anthropic-shaped provider (the
/// `-max` variant in OAuth mode), `openai` gets the OpenAI-shaped provider,
/// anything else is treated as a local NDJSON endpoint.
pub fn build_registry(config: &GatewayConfig, credentials_path: &std::path::Path) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register("local", Arc::new(MockProvider::new()));

    for (prefix, backend_config) in &config.backends {
        let retry = RetryPolicy {
            base_ms: backend_config.retry_base_ms,
            factor: backend_config.retry_factor,
            max_ms: backend_config.retry_max_ms,
            retries: backend_config.retries,
        };
        let base_url = backend_config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(prefix));

        let client = pearl_backends::http_client(backend_config.request_timeout_ms);

        if prefix == "anthropic-max" {
            let oauth = OAuthManager::new(
                credentials_path,
                backend_config.oauth_client_id.clone().unwrap_or_default(),
                backend_config.oauth_client_secret.clone(),
                ANTHROPIC_TOKEN_ENDPOINT,
                client.clone(),
            );
            registry.register(
                prefix.clone(),
                Arc::new(AnthropicProvider::with_oauth(base_url, oauth, retry, client)),
            );
        } else if prefix == "anthropic" {
            let api_key = backend_config.api_key.clone().unwrap_or_default();
            if looks_like_oauth_token(&api_key) {
                tracing::warn!(
                    prefix,
                    "configured api_key looks like an OAuth token; register this backend as anthropic-max instead"
                );
            }
            registry.register(
                prefix.clone(),
                Arc::new(AnthropicProvider::with_api_key(base_url, api_key, retry, client)),
            );
        } else if prefix == "openai" {
            let api_key = backend_config.api_key.clone().unwrap_or_default();
            registry.register(prefix.clone(), Arc::new(OpenAiProvider::new(base_url, api_key, retry, client)));
        } else {
            registry.register(prefix.clone(), Arc::new(LocalProvider::new(base_url, client)));
        }
    }

    registry
}

fn default_base_url(prefix: &str) -> String {
    match prefix {
        "anthropic" | "anthropic-max" => "https://api.anthropic.com".to_string(),
        "openai" => "https://api.openai.com/v1".to_string(),
        _ => "http://127.0.0.1:11434".to_string(),
    }
}

/// Picks the embedding provider: a dedicated `backends.embedding` entry gets
/// the batch-native remote provider, otherwise embeddings ride on the
/// `local` backend's endpoint through the single-item provider.
pub fn build_embedder(config: &GatewayConfig) -> Arc<dyn EmbeddingProvider> {
    let dimensions = config.memory.embedding_dimensions;
    match config.backends.get("embedding") {
        Some(embedding_config) => {
            let client = pearl_backends::http_client(embedding_config.request_timeout_ms);
            Arc::new(RemoteEmbeddingProvider::new(
                embedding_config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| default_base_url("embedding")),
                embedding_config.api_key.clone().unwrap_or_default(),
                "embedding",
                dimensions,
                client,
            ))
        }
        None => {
            let local_config = config.backends.get("local");
            let base_url = local_config
                .and_then(|b| b.base_url.clone())
                .unwrap_or_else(|| default_base_url("local"));
            let timeout_ms = local_config
                .map(|b| b.request_timeout_ms)
                .unwrap_or_else(|| pearl_core::config::BackendConfig::default().request_timeout_ms);
            let client = pearl_backends::http_client(timeout_ms);
            Arc::new(LocalEmbeddingProvider::new(base_url, dimensions, client))
        }
    }
}
