//! `playurl` - resolve opaque provider media references into playable URLs
//!
//! Providers hide their real stream URLs behind short-lived tokens, redirect
//! chains and encrypted payloads. The decoding logic ships as a provider
//! script (JavaScript) loaded at runtime; this crate runs it in a `QuickJS`
//! sandbox and performs the HTTP fetches it asks for, iterating until the
//! script reports the final URLs.
//!
//! # Features
//!
//! - **Script sandbox**: fresh `QuickJS` runtime per run, memory/stack/time limits
//! - **Negotiation loop**: bounded request/response state machine with cancellation
//! - **Provider adapters**: per-provider request shaping (XML catalog queries)
//! - **HTTP**: rustls, compression, connection pooling shared across runs
//!
//! # Example
//!
//! ```rust,no_run
//! use playurl::{ProviderId, Resolver, ResolverConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolver = Resolver::new(ResolverConfig::load()?)?;
//!     let script = std::fs::read_to_string("youku.js")?;
//!     let urls = resolver
//!         .resolve(ProviderId::YOUKU, "https://v.youku.com/v_show/id_X.html", &script)
//!         .await?;
//!     for url in urls {
//!         println!("{url}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod fetch;
pub mod js_engine;
pub mod negotiation;
pub mod protocol;
pub mod provider;
pub mod resolver;

pub use adapter::{AdapterRegistry, CatalogQueryXml, FetchBuilder, PassThrough};
pub use config::{ResolverConfig, DEFAULT_ENTRY_POINT};
pub use error::ResolveError;
pub use fetch::{ConcreteRequest, FetchExecutor, HttpFetcher};
pub use js_engine::{SandboxLimits, ScriptSandbox};
pub use negotiation::{Negotiator, Resolution};
pub use protocol::{CallbackData, FetchHeaders, FetchInstruction, ResolutionRequest, ResolutionResponse};
pub use provider::{ContentType, PlaySource, ProviderDescriptor, ProviderId, Quality, KNOWN_PROVIDERS};
pub use resolver::Resolver;
pub use tokio_util::sync::CancellationToken;

/// Version of playurl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
