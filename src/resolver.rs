//! Resolution facade
//!
//! The entry point collaborators call. Given a provider, a URL and the
//! provider script text, returns the playable URL(s) or the reason the run
//! failed. Every call is an independent run with its own sandbox.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::{AdapterRegistry, FetchBuilder};
use crate::config::ResolverConfig;
use crate::error::{ResolveError, Result};
use crate::fetch::{FetchExecutor, HttpFetcher};
use crate::js_engine::ScriptSandbox;
use crate::negotiation::{Negotiator, Resolution};
use crate::provider::{PlaySource, ProviderId};

/// Resolves provider references into playable URLs.
///
/// Cheap to share: wrap in an [`Arc`] and call from as many tasks as
/// needed. Runs share only the HTTP connection pool.
#[derive(Clone)]
pub struct Resolver {
    config: ResolverConfig,
    adapters: AdapterRegistry,
    fetcher: Arc<dyn FetchExecutor>,
}

impl Resolver {
    /// Create a resolver backed by a real HTTP client.
    pub fn new(config: ResolverConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Create a resolver with a custom fetch executor.
    pub fn with_fetcher(config: ResolverConfig, fetcher: Arc<dyn FetchExecutor>) -> Self {
        Self {
            config,
            adapters: AdapterRegistry::default(),
            fetcher,
        }
    }

    /// Add or replace the request adapter for `provider`.
    pub fn register_adapter(&mut self, provider: ProviderId, builder: Arc<dyn FetchBuilder>) {
        self.adapters.register(provider, builder);
    }

    /// Resolve `url` for `provider` with the provider's default parameters.
    ///
    /// The identity provider returns `[url]` without touching the script.
    pub async fn resolve(&self, provider: ProviderId, url: &str, script: &str) -> Result<Vec<String>> {
        if provider.is_identity() {
            return Ok(vec![url.to_string()]);
        }
        let source = PlaySource::for_provider(provider, url);
        self.resolve_source(source, script, CancellationToken::new())
            .await
            .map(|resolution| resolution.urls)
    }

    /// Resolve by provider *name*.
    ///
    /// Names without a script-driven provider are the identity case.
    pub async fn resolve_named(&self, name: &str, url: &str, script: &str) -> Result<Vec<String>> {
        match ProviderId::from_name(name) {
            Some(provider) => self.resolve(provider, url, script).await,
            None => {
                debug!(name, "Provider needs no resolution");
                Ok(vec![url.to_string()])
            }
        }
    }

    /// Full-control entry: explicit static parameters and cancellation.
    ///
    /// Cancelling `cancel` stops the run between iterations, aborts an
    /// in-flight fetch and interrupts a running script.
    pub async fn resolve_source(
        &self,
        source: PlaySource,
        script: &str,
        cancel: CancellationToken,
    ) -> Result<Resolution> {
        if source.provider.is_identity() {
            return Ok(Resolution {
                urls: vec![source.url],
                ..Resolution::default()
            });
        }

        let outcome = self.run(&source, script, cancel).await;
        if let Err(err) = &outcome {
            warn!(
                provider = %source.provider,
                url = %source.url,
                kind = err.kind(),
                error = %err,
                "Resolution failed"
            );
        }
        outcome
    }

    async fn run(&self, source: &PlaySource, script: &str, cancel: CancellationToken) -> Result<Resolution> {
        if script.trim().is_empty() {
            return Err(ResolveError::ScriptLoad("no script configured".to_string()));
        }

        let source_text = script.to_string();
        let entry_point = self.config.entry_point.clone();
        let limits = self.config.sandbox_limits();
        let load_cancel = cancel.clone();
        let sandbox = tokio::task::spawn_blocking(move || {
            ScriptSandbox::load(&source_text, &entry_point, limits, Some(load_cancel))
        })
        .await
        .map_err(|e| ResolveError::ScriptLoad(format!("script task failed: {e}")))??;

        Negotiator::new(
            sandbox,
            &self.adapters,
            self.fetcher.as_ref(),
            self.config.max_iterations,
            cancel,
        )
        .run(source)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;

    use std::time::{Duration, Instant};

    use super::*;
    use crate::fetch::ConcreteRequest;
    use crate::protocol::FetchInstruction;

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchExecutor for CountingFetcher {
        async fn fetch(&self, _request: ConcreteRequest) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"body"))
        }
    }

    fn resolver() -> (Resolver, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = Resolver::with_fetcher(ResolverConfig::default(), fetcher.clone());
        (resolver, fetcher)
    }

    const DONE: &str = r"
        function GetRealPlayUrl(arg) {
            var req = JSON.parse(arg);
            return JSON.stringify({ done: true, urls: [req.url + '/real'] });
        }
    ";

    #[tokio::test]
    async fn identity_provider_skips_everything() {
        let (resolver, fetcher) = resolver();
        // Script is not even looked at.
        let urls = resolver
            .resolve(ProviderId::SYSTEM, "https://own.example/a.m3u8", "")
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://own.example/a.m3u8"]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identity_source_skips_everything() {
        let (resolver, _) = resolver();
        let resolution = resolver
            .resolve_source(
                PlaySource::for_provider(ProviderId::SYSTEM, "x"),
                "this is not javascript",
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(resolution.urls, vec!["x"]);
        assert_eq!(resolution.iterations, 0);
    }

    #[tokio::test]
    async fn empty_script_is_load_error() {
        let (resolver, _) = resolver();
        let err = resolver
            .resolve(ProviderId::YOUKU, "https://v.example/", " \n")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ScriptLoad(_)));
    }

    #[tokio::test]
    async fn broken_script_is_load_error() {
        let (resolver, _) = resolver();
        let err = resolver
            .resolve(ProviderId::YOUKU, "https://v.example/", "function (")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ScriptLoad(_)));
    }

    #[tokio::test]
    async fn resolves_through_script() {
        let (resolver, fetcher) = resolver();
        let urls = resolver
            .resolve(ProviderId::YOUKU, "https://v.example/id", DONE)
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://v.example/id/real"]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolve_named_maps_youku_and_passes_others_through() {
        let (resolver, _) = resolver();
        let urls = resolver
            .resolve_named("youku", "https://v.example/id", DONE)
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://v.example/id/real"]);

        let urls = resolver
            .resolve_named("tencent", "https://t.example/id", DONE)
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://t.example/id"]);
    }

    #[tokio::test]
    async fn resolve_named_uses_web_page_defaults() {
        let (resolver, _) = resolver();
        let script = r"
            function GetRealPlayUrl(arg) {
                var r = JSON.parse(arg);
                return JSON.stringify({ done: true, urls: [[r.provider, r.quality, r.content_type,
                    r.channel, r.tv_type].join(',')] });
            }
        ";
        let urls = resolver.resolve_named("youku", "u", script).await.unwrap();
        assert_eq!(urls, vec!["4,3,2,,"]);
    }

    #[tokio::test]
    async fn custom_entry_point_from_config() {
        let config = ResolverConfig {
            entry_point: "Resolve".into(),
            ..ResolverConfig::default()
        };
        let resolver = Resolver::with_fetcher(config, Arc::new(CountingFetcher::default()));
        let urls = resolver
            .resolve(
                ProviderId::IQIYI,
                "u",
                "function Resolve(a) { return {done: true, urls: ['r']}; }",
            )
            .await
            .unwrap();
        assert_eq!(urls, vec!["r"]);
    }

    #[tokio::test]
    async fn iteration_cap_comes_from_config() {
        let config = ResolverConfig {
            max_iterations: 3,
            ..ResolverConfig::default()
        };
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = Resolver::with_fetcher(config, fetcher.clone());
        let err = resolver
            .resolve(
                ProviderId::SOHU,
                "u",
                "function GetRealPlayUrl(a) { return {done: false, fetch_url_new: {url: 'https://s.example/'}}; }",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MaxIterationsExceeded(3)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn runs_do_not_share_script_state() {
        let (resolver, _) = resolver();
        let script = r"
            var seen = 0;
            function GetRealPlayUrl(a) { seen += 1; return {done: true, urls: [String(seen)]}; }
        ";
        for _ in 0..3 {
            let urls = resolver.resolve(ProviderId::MANGO, "u", script).await.unwrap();
            assert_eq!(urls, vec!["1"]);
        }
    }

    #[tokio::test]
    async fn concurrent_runs_are_independent() {
        let (resolver, _) = resolver();
        let resolver = Arc::new(resolver);
        let mut handles = Vec::new();
        for i in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                let url = format!("https://v.example/{i}");
                resolver.resolve(ProviderId::YOUKU, &url, DONE).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let urls = handle.await.unwrap().unwrap();
            assert_eq!(urls, vec![format!("https://v.example/{i}/real")]);
        }
    }

    /// Answers every fetch with `<METHOD> <url> <x-adapter header>`.
    struct EchoFetcher;

    #[async_trait]
    impl FetchExecutor for EchoFetcher {
        async fn fetch(&self, request: ConcreteRequest) -> Result<Bytes> {
            let echo = format!(
                "{} {} {}",
                request.method,
                request.url,
                request.header("X-Adapter").unwrap_or("-")
            );
            Ok(Bytes::from(echo))
        }
    }

    /// Sends every fetch to a fixed mirror, tagged with the run's channel.
    struct MirrorAdapter;

    impl FetchBuilder for MirrorAdapter {
        fn name(&self) -> &'static str {
            "mirror"
        }

        fn build(&self, _instruction: &FetchInstruction, source: &PlaySource) -> Result<ConcreteRequest> {
            let mut request = ConcreteRequest::get("https://mirror.example/api");
            request
                .headers
                .push(("X-Adapter".to_string(), format!("mirror:{}", source.channel)));
            Ok(request)
        }
    }

    const FETCH_THEN_ECHO: &str = r"
        function GetRealPlayUrl(arg) {
            var req = JSON.parse(arg);
            if (req.times === 1) {
                return { done: false, fetch_url_new: { url: 'https://origin.example/x', method: 'POST' } };
            }
            return { done: true, urls: [req.html_data] };
        }
    ";

    #[tokio::test]
    async fn registered_adapter_shapes_the_fetch() {
        let mut resolver = Resolver::with_fetcher(ResolverConfig::default(), Arc::new(EchoFetcher));
        resolver.register_adapter(ProviderId::MIGU, Arc::new(MirrorAdapter));

        let source = PlaySource::for_provider(ProviderId::MIGU, "https://migu.example/").with_channel("cctv1");
        let resolution = resolver
            .resolve_source(source, FETCH_THEN_ECHO, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.urls, vec!["GET https://mirror.example/api mirror:cctv1"]);

        // Other providers still pass through.
        let urls = resolver
            .resolve(ProviderId::MANGO, "https://mango.example/", FETCH_THEN_ECHO)
            .await
            .unwrap();
        assert_eq!(urls, vec!["POST https://origin.example/x -"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancel_interrupts_spinning_script_on_current_thread() {
        let config = ResolverConfig {
            script_timeout_ms: 3_000,
            ..ResolverConfig::default()
        };
        let resolver = Resolver::with_fetcher(config, Arc::new(CountingFetcher::default()));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = resolver
            .resolve_source(
                PlaySource::for_provider(ProviderId::YOUKU, "u"),
                "function GetRealPlayUrl(a) { for (;;) {} }",
                token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Cancelled), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancel_interrupts_spinning_load_on_current_thread() {
        let config = ResolverConfig {
            script_timeout_ms: 3_000,
            ..ResolverConfig::default()
        };
        let resolver = Resolver::with_fetcher(config, Arc::new(CountingFetcher::default()));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = resolver
            .resolve_source(
                PlaySource::for_provider(ProviderId::YOUKU, "u"),
                "while (true) {} function GetRealPlayUrl(a) {}",
                token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Cancelled), "{err}");
    }
}
