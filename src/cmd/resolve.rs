use std::path::PathBuf;

use anyhow::{bail, Result};
use serde_json::json;

use playurl::{CancellationToken, ContentType, PlaySource, ProviderId, Quality, Resolver, ResolverConfig};

use super::read_script;

pub struct ResolveOptions {
    pub url: String,
    pub script: Option<PathBuf>,
    pub provider: ProviderId,
    pub channel: Option<String>,
    pub quality: Option<Quality>,
    pub tv_type: Option<String>,
    pub content_type: Option<ContentType>,
    pub max_iterations: Option<u32>,
    pub json: bool,
}

impl ResolveOptions {
    fn source(&self) -> PlaySource {
        let mut source = PlaySource::for_provider(self.provider, self.url.clone());
        if let Some(channel) = &self.channel {
            source = source.with_channel(channel.clone());
        }
        if let Some(quality) = self.quality {
            source = source.with_quality(quality);
        }
        if let Some(tv_type) = &self.tv_type {
            source = source.with_tv_type(tv_type.clone());
        }
        if let Some(content_type) = self.content_type {
            source = source.with_content_type(content_type);
        }
        source
    }
}

pub async fn cmd_resolve(mut config: ResolverConfig, options: ResolveOptions) -> Result<()> {
    if let Some(max) = options.max_iterations {
        anyhow::ensure!(max > 0, "--max-iterations must be at least 1");
        config.max_iterations = max;
    }

    let script = match &options.script {
        Some(path) => read_script(path)?,
        None => String::new(),
    };

    let resolver = Resolver::new(config)?;

    // Ctrl-C cancels the run instead of killing it mid-fetch.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let resolution = match resolver
        .resolve_source(options.source(), &script, cancel)
        .await
    {
        Ok(resolution) => resolution,
        Err(err) => bail!("resolution failed [{}]: {err}", err.kind()),
    };

    if options.json {
        let out = json!({
            "provider": options.provider.0,
            "urls": resolution.urls,
            "is_support_back": resolution.is_support_back,
            "iterations": resolution.iterations,
            "fetches": resolution.fetches,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if resolution.urls.is_empty() {
        eprintln!("⚠️  Script finished without a playable URL");
        return Ok(());
    }
    for url in &resolution.urls {
        println!("{url}");
    }
    Ok(())
}
