//! Provider adapter hook
//!
//! Turns the script's [`FetchInstruction`] into the [`ConcreteRequest`] the
//! fetcher sends. Most providers pass the instruction through verbatim; a
//! provider that cannot be driven by the generic contract registers its own
//! [`FetchBuilder`] here, without touching the negotiation loop.

use std::collections::HashMap;
use std::sync::Arc;

use quick_xml::escape::escape;
use reqwest::Method;
use url::Url;

use crate::error::{ResolveError, Result};
use crate::fetch::ConcreteRequest;
use crate::protocol::FetchInstruction;
use crate::provider::{PlaySource, ProviderId, Quality};

/// Shapes the outbound request for one provider.
pub trait FetchBuilder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Build the request for `instruction` within the run described by
    /// `source`.
    fn build(&self, instruction: &FetchInstruction, source: &PlaySource) -> Result<ConcreteRequest>;
}

/// Sends exactly what the script asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl FetchBuilder for PassThrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn build(&self, instruction: &FetchInstruction, _source: &PlaySource) -> Result<ConcreteRequest> {
        let url = parse_url(&instruction.url)?;
        let method = parse_method(&instruction.method)?;

        let header = &instruction.header;
        let headers = [
            ("User-Agent", &header.user_agent),
            ("Referer", &header.referer),
            ("Content-Type", &header.content_type),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();

        let body = (!instruction.body.is_empty()).then(|| instruction.body.clone());

        Ok(ConcreteRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

/// Folder code for the 720p tier.
const FOLDER_720P: &str = "1000996";
/// Folder code for every other tier.
const FOLDER_DEFAULT: &str = "1000995";

/// XML catalog query for the TV-catalog provider.
///
/// Only the URL comes from the script. Method, body and content type are
/// fixed: a `CONTENT_QUERY` document for the run's channel, POSTed as
/// `application/xml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogQueryXml;

impl CatalogQueryXml {
    /// The query document for `channel` at `quality`.
    pub fn document(channel: &str, quality: Quality) -> String {
        let folder = if quality == Quality::P720 {
            FOLDER_720P
        } else {
            FOLDER_DEFAULT
        };
        let code = escape(channel);
        format!(
            "<message module=\"CATALOG_SERVICE\" version=\"1.0\">\n\
             \t<header action=\"REQUEST\" command=\"CONTENT_QUERY\" sequence=\"20121030212732_103861\" component-id=\"SYSTEM2\" component-type=\"THIRD_PARTY_SYSTEM\" />\n\
             \t<body>\n\
             \t\t<contents>\n\
             \t\t\t<content>\n\
             \t\t\t\t<code>{code}</code>\n\
             \t\t\t\t<site-code>1000889</site-code>\n\
             \t\t\t\t<items-index>-1</items-index>\n\
             \t\t\t\t<folder-code>{folder}</folder-code>\n\
             \t\t\t\t<format>-1</format>\n\
             \t\t\t</content>\n\
             \t\t</contents>\n\
             \t</body>\n\
             </message>"
        )
    }
}

impl FetchBuilder for CatalogQueryXml {
    fn name(&self) -> &'static str {
        "catalog-query-xml"
    }

    fn build(&self, instruction: &FetchInstruction, source: &PlaySource) -> Result<ConcreteRequest> {
        Ok(ConcreteRequest {
            method: Method::POST,
            url: parse_url(&instruction.url)?,
            headers: vec![("Content-Type".to_string(), "application/xml".to_string())],
            body: Some(Self::document(&source.channel, source.quality)),
        })
    }
}

/// `ProviderId → FetchBuilder` lookup with a fallback.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderId, Arc<dyn FetchBuilder>>,
    fallback: Arc<dyn FetchBuilder>,
}

impl AdapterRegistry {
    /// Registry with no special cases: every provider passes through.
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
            fallback: Arc::new(PassThrough),
        }
    }

    /// Register (or replace) the builder for `provider`.
    pub fn register(&mut self, provider: ProviderId, builder: Arc<dyn FetchBuilder>) {
        self.adapters.insert(provider, builder);
    }

    /// Builder for `provider`, falling back to pass-through.
    pub fn builder_for(&self, provider: ProviderId) -> &dyn FetchBuilder {
        match self.adapters.get(&provider) {
            Some(builder) => builder.as_ref(),
            None => self.fallback.as_ref(),
        }
    }
}

impl Default for AdapterRegistry {
    /// Registry with the built-in special cases.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ProviderId::HUASHU, Arc::new(CatalogQueryXml));
        registry
    }
}

fn parse_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let url = Url::parse(raw)
        .map_err(|e| ResolveError::protocol(format!("fetch url '{raw}' is invalid: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url.into()),
        other => Err(ResolveError::protocol(format!(
            "fetch url '{raw}' has unsupported scheme '{other}'"
        ))),
    }
}

fn parse_method(raw: &str) -> Result<Method> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| ResolveError::protocol(format!("fetch method '{raw}' is invalid")))
}
