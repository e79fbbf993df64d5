//! Identity-token providers for Sigstore
//!
//! Signing clients obtain an OIDC identity token from whatever the
//! environment offers: a CI system's token endpoint, a variable injected by
//! the CI runner, or a token file mounted into the workload. Each source is
//! a [`Provider`]; a [`ProviderRegistry`] is built explicitly from a table of
//! named constructors and asks its providers in table order.
//!
//! # Example
//!
//! ```no_run
//! use sigstore_oidc::ProviderRegistry;
//!
//! # async fn example() -> Result<(), sigstore_oidc::Error> {
//! let registry = ProviderRegistry::builtin()?;
//! if registry.enabled() {
//!     let token = registry.provide("sigstore").await?;
//!     println!("got a {} byte token", token.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod providers;

pub use error::{Error, Result};
pub use providers::{
    Env, Filesystem, GitHubActions, GitLab, Provider, ProviderConstructor, ProviderRegistry,
    TokenFuture, BUILTIN_PROVIDERS, DEFAULT_TOKEN_PATH,
};
