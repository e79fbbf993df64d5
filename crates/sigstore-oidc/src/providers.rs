//! Identity providers and their registry
//!
//! Providers detect their source from the environment they were
//! constructed with, never from global state, so a registry can be built
//! for a fake environment in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

/// Future returned by [`Provider::provide`]
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Token file mounted by workload identity setups
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/sigstore/cosign/oidc-token";

/// A source of OIDC identity tokens
pub trait Provider: Send + Sync + fmt::Debug {
    /// Whether this provider can produce a token here
    fn enabled(&self) -> bool;

    /// Obtain a token for `audience`
    fn provide<'a>(&'a self, audience: &'a str) -> TokenFuture<'a>;
}

/// Environment-variable lookup handed to provider constructors
#[derive(Clone)]
pub struct Env {
    lookup: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl Env {
    /// The process environment
    pub fn process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// An environment backed by `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    /// A fixed environment
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let vars: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_lookup(move |key| vars.get(key).cloned())
    }

    /// Value of `key`, treating empty values as unset
    pub fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Env")
    }
}

/// Builds a provider for an environment
pub type ProviderConstructor = fn(&Env) -> Box<dyn Provider>;

/// Providers known out of the box, in the order they are asked
pub const BUILTIN_PROVIDERS: &[(&str, ProviderConstructor)] = &[
    ("github-actions", GitHubActions::boxed),
    ("gitlab", GitLab::boxed),
    ("filesystem", Filesystem::boxed),
];

/// GitHub Actions OIDC token endpoint
///
/// Enabled when the workflow has `id-token: write`, which makes the runner
/// export `ACTIONS_ID_TOKEN_REQUEST_URL` and `ACTIONS_ID_TOKEN_REQUEST_TOKEN`.
#[derive(Debug, Clone)]
pub struct GitHubActions {
    request: Option<(String, String)>,
    client: reqwest::Client,
}

impl GitHubActions {
    /// Read the token request endpoint from `env`
    pub fn new(env: &Env) -> Self {
        let request = env
            .var("ACTIONS_ID_TOKEN_REQUEST_URL")
            .zip(env.var("ACTIONS_ID_TOKEN_REQUEST_TOKEN"));
        Self {
            request,
            client: reqwest::Client::new(),
        }
    }

    fn boxed(env: &Env) -> Box<dyn Provider> {
        Box::new(Self::new(env))
    }

    async fn fetch(&self, audience: &str) -> Result<String> {
        let (url, bearer) = self
            .request
            .as_ref()
            .ok_or_else(|| Error::Token("ACTIONS_ID_TOKEN_REQUEST_URL not set".to_string()))?;

        let response = self
            .client
            .get(url)
            .query(&[("audience", audience)])
            .header("Authorization", format!("bearer {}", bearer))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Token(format!(
                "GitHub Actions returned status {}",
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            value: String,
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Token(format!("failed to parse token response: {}", e)))?;
        if token.value.is_empty() {
            return Err(Error::Token("GitHub Actions returned an empty token".to_string()));
        }
        Ok(token.value)
    }
}

impl Provider for GitHubActions {
    fn enabled(&self) -> bool {
        self.request.is_some()
    }

    fn provide<'a>(&'a self, audience: &'a str) -> TokenFuture<'a> {
        Box::pin(self.fetch(audience))
    }
}

/// GitLab CI job token
///
/// GitLab mints the token for the audience configured in the job's
/// `id_tokens`, so the requested audience is not used.
#[derive(Debug, Clone)]
pub struct GitLab {
    token: Option<String>,
}

impl GitLab {
    /// Read `SIGSTORE_ID_TOKEN`, falling back to `CI_JOB_JWT_V2`
    pub fn new(env: &Env) -> Self {
        Self {
            token: env.var("SIGSTORE_ID_TOKEN").or_else(|| env.var("CI_JOB_JWT_V2")),
        }
    }

    fn boxed(env: &Env) -> Box<dyn Provider> {
        Box::new(Self::new(env))
    }
}

impl Provider for GitLab {
    fn enabled(&self) -> bool {
        self.token.is_some()
    }

    fn provide<'a>(&'a self, _audience: &'a str) -> TokenFuture<'a> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| Error::Token("SIGSTORE_ID_TOKEN or CI_JOB_JWT_V2 not set".to_string()));
        Box::pin(async move { token })
    }
}

/// Token read from a file
#[derive(Debug, Clone)]
pub struct Filesystem {
    path: PathBuf,
}

impl Filesystem {
    /// Read the token from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn boxed(_env: &Env) -> Box<dyn Provider> {
        Box::new(Self::new(DEFAULT_TOKEN_PATH))
    }
}

impl Provider for Filesystem {
    fn enabled(&self) -> bool {
        self.path.is_file()
    }

    fn provide<'a>(&'a self, _audience: &'a str) -> TokenFuture<'a> {
        Box::pin(async move {
            let token = tokio::fs::read_to_string(&self.path).await?;
            let token = token.trim();
            if token.is_empty() {
                return Err(Error::Token(format!("{} is empty", self.path.display())));
            }
            Ok(token.to_string())
        })
    }
}

/// Named providers, asked in registration order
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<(String, Box<dyn Provider>)>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `(name, constructor)` pairs
    pub fn from_table(table: &[(&str, ProviderConstructor)], env: &Env) -> Result<Self> {
        let mut registry = Self::new();
        for (name, constructor) in table {
            registry.register(*name, constructor(env))?;
        }
        Ok(registry)
    }

    /// [`BUILTIN_PROVIDERS`] for the process environment
    pub fn builtin() -> Result<Self> {
        Self::from_table(BUILTIN_PROVIDERS, &Env::process())
    }

    /// Add `provider` under `name`, after every provider registered so far
    pub fn register(&mut self, name: impl Into<String>, provider: Box<dyn Provider>) -> Result<()> {
        let name = name.into();
        if self.providers.iter().any(|(existing, _)| *existing == name) {
            return Err(Error::DuplicateProvider(name));
        }
        self.providers.push((name, provider));
        Ok(())
    }

    /// Registered names, in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|(name, _)| name.as_str())
    }

    /// Whether any provider is enabled
    pub fn enabled(&self) -> bool {
        self.providers.iter().any(|(_, provider)| provider.enabled())
    }

    /// Token from the first enabled provider
    pub async fn provide(&self, audience: &str) -> Result<String> {
        for (name, provider) in &self.providers {
            if provider.enabled() {
                debug!("requesting identity token from {}", name);
                return provider.provide(audience).await;
            }
        }
        Err(Error::NoProvider)
    }
}
