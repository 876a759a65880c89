use crate::chat::StreamChunk;
use crate::error::CollabError;
use crate::provider::Provider;
use http::{Request, Response};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use url::Url;

/// Sans-IO per-provider adapter (C2): builds the wire request and parses one
/// SSE event's worth of bytes into zero or more chunks. The actual HTTP
/// connection is opened by [`crate::streaming::stream_http_chat`], which is
/// shared across every provider so retry/deadline/cancellation logic is
/// written once, not once per vendor.
pub trait HttpChatProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn default_base_url(&self) -> Url;

    fn build_request(
        &self,
        base_url: &Url,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Request<Vec<u8>>, CollabError>;

    /// Parse one SSE `data: ...` line (or block) into chunks. Must never
    /// synthesize text from a non-text payload (e.g. a tool/function-call
    /// delta) — drop it instead.
    fn parse_stream_chunk(&self, event: &[u8]) -> Result<Vec<StreamChunk>, CollabError>;

    /// Parse a complete, non-streaming response body. Used only to surface a
    /// structured error message when the server answers with a non-2xx body
    /// instead of an event stream.
    fn parse_error_body(&self, resp: &Response<Vec<u8>>) -> String {
        String::from_utf8_lossy(resp.body()).into_owned()
    }
}

/// Opaque handle bound to `(user, provider)`; owns credentials, base URL and
/// the adapter implementation. Returned by [`ProviderClientRegistry::get_client`].
#[derive(Clone)]
pub struct AgentClient {
    pub provider: Provider,
    pub api_key: String,
    pub base_url: Url,
    pub adapter: Arc<dyn HttpChatProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    NoKey,
    KeyRejected,
    RegistryUnavailable,
}

/// Resolves a user's stored key for a provider. The real key store
/// (encrypted-at-rest, keyed by user) lives outside this engine; this trait
/// is the seam the Session Gateway plugs a concrete store into.
pub trait KeyStore: Send + Sync {
    fn stored_key(&self, user_id: &str, provider: Provider) -> Option<String>;
}

/// A `KeyStore` with nothing stored; every resolution falls through to the
/// process environment. Useful as a default and in tests.
pub struct NoStoredKeys;
impl KeyStore for NoStoredKeys {
    fn stored_key(&self, _user_id: &str, _provider: Provider) -> Option<String> {
        None
    }
}

type AdapterMap = HashMap<Provider, Arc<dyn HttpChatProvider>>;

/// Process-wide registry (C1). Caches constructed clients per `(userId, provider)`
/// until `invalidate(userId)` purges them — called by the Session Gateway on
/// (re)authentication so updated keys take effect.
pub struct ProviderClientRegistry {
    adapters: AdapterMap,
    key_store: Arc<dyn KeyStore>,
    cache: RwLock<HashMap<(String, Provider), Arc<AgentClient>>>,
}

impl ProviderClientRegistry {
    pub fn new(adapters: Vec<Arc<dyn HttpChatProvider>>, key_store: Arc<dyn KeyStore>) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.provider(), a)).collect();
        Self {
            adapters,
            key_store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolution order: (1) user-stored key, (2) process environment key.
    fn resolve_key(&self, user_id: &str, provider: Provider) -> Result<String, ClientError> {
        if let Some(key) = self.key_store.stored_key(user_id, provider) {
            return Ok(key);
        }
        std::env::var(provider.env_key_name()).map_err(|_| ClientError::NoKey)
    }

    pub fn get_client(&self, user_id: &str, provider: Provider) -> Result<Arc<AgentClient>, ClientError> {
        let cache_key = (user_id.to_string(), provider);
        if let Some(client) = self.cache.read().unwrap().get(&cache_key) {
            return Ok(client.clone());
        }

        let adapter = self
            .adapters
            .get(&provider)
            .ok_or(ClientError::RegistryUnavailable)?
            .clone();
        let api_key = self.resolve_key(user_id, provider)?;

        let base_url = provider_base_url_override(provider).unwrap_or_else(|| adapter.default_base_url());

        let client = Arc::new(AgentClient {
            provider,
            api_key,
            base_url,
            adapter,
        });

        self.cache.write().unwrap().insert(cache_key, client.clone());
        Ok(client)
    }

    /// Every provider with a usable client for `user_id`.
    pub fn get_availability(&self, user_id: &str) -> Vec<Provider> {
        Provider::all()
            .filter(|p| self.get_client(user_id, *p).is_ok())
            .collect()
    }

    /// Purge every cached client for `user_id`; called on (re)authentication.
    pub fn invalidate(&self, user_id: &str) {
        self.cache.write().unwrap().retain(|(u, _), _| u != user_id);
    }
}

fn provider_base_url_override(provider: Provider) -> Option<Url> {
    if provider == Provider::Llama {
        if let Ok(raw) = std::env::var("LLAMA_BASE_URL") {
            return Url::parse(&raw).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter(Provider);
    impl HttpChatProvider for StubAdapter {
        fn provider(&self) -> Provider {
            self.0
        }
        fn default_base_url(&self) -> Url {
            Url::parse("https://example.invalid/").unwrap()
        }
        fn build_request(
            &self,
            _base_url: &Url,
            _api_key: &str,
            _model: &str,
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<Request<Vec<u8>>, CollabError> {
            Ok(Request::builder().uri("https://example.invalid/").body(Vec::new()).unwrap())
        }
        fn parse_stream_chunk(&self, _event: &[u8]) -> Result<Vec<StreamChunk>, CollabError> {
            Ok(vec![])
        }
    }

    #[test]
    fn no_key_anywhere_is_no_key_error() {
        // SAFETY: test-only env var scoped to this key name; no other test touches it.
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
        let registry = ProviderClientRegistry::new(
            vec![Arc::new(StubAdapter(Provider::Claude))],
            Arc::new(NoStoredKeys),
        );
        let err = registry.get_client("u1", Provider::Claude).unwrap_err();
        assert_eq!(err, ClientError::NoKey);
    }

    #[test]
    fn stored_key_takes_precedence_over_env() {
        struct Stored;
        impl KeyStore for Stored {
            fn stored_key(&self, _user_id: &str, _provider: Provider) -> Option<String> {
                Some("stored-key".to_string())
            }
        }
        // SAFETY: test-only env var scoped to this key name.
        unsafe { std::env::set_var("ANTHROPIC_API_KEY", "env-key") };
        let registry = ProviderClientRegistry::new(
            vec![Arc::new(StubAdapter(Provider::Claude))],
            Arc::new(Stored),
        );
        let client = registry.get_client("u1", Provider::Claude).unwrap();
        assert_eq!(client.api_key, "stored-key");
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
    }

    #[test]
    fn invalidate_purges_only_that_user() {
        unsafe { std::env::set_var("ANTHROPIC_API_KEY", "env-key") };
        let registry = ProviderClientRegistry::new(
            vec![Arc::new(StubAdapter(Provider::Claude))],
            Arc::new(NoStoredKeys),
        );
        registry.get_client("u1", Provider::Claude).unwrap();
        registry.get_client("u2", Provider::Claude).unwrap();
        registry.invalidate("u1");
        assert!(!registry.cache.read().unwrap().contains_key(&("u1".to_string(), Provider::Claude)));
        assert!(registry.cache.read().unwrap().contains_key(&("u2".to_string(), Provider::Claude)));
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
    }
}
