//! Negotiation loop
//!
//! Drives one run: ask the script what to do, perform the fetch it asked
//! for, feed the body back, repeat until the script says it is done.
//!
//! ```text
//! Start ─► AwaitingScript ─► Done
//!               │   ▲
//!               ▼   │
//!          FetchRequested
//! ```
//!
//! Any error moves the run to `Failed`, which is the `Err` of
//! [`Negotiator::run`]. Iterations are strictly sequential. Script calls run
//! on the blocking pool so a spinning script never stalls the executor.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::adapter::AdapterRegistry;
use crate::error::{ResolveError, Result};
use crate::fetch::FetchExecutor;
use crate::js_engine::ScriptSandbox;
use crate::protocol::{CallbackData, FetchInstruction, ResolutionRequest, ResolutionResponse};
use crate::provider::PlaySource;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Resolved URLs; several entries are ordered segments of one stream.
    /// Empty means the script finished without a result.
    pub urls: Vec<String>,
    /// Seek/rewind capability reported by the script.
    pub is_support_back: bool,
    /// Number of script invocations.
    pub iterations: u32,
    /// Number of fetches performed.
    pub fetches: u32,
}

enum State {
    AwaitingScript(ResolutionRequest),
    FetchRequested {
        request: ResolutionRequest,
        instruction: FetchInstruction,
        call_back_data: CallbackData,
    },
    Done(Resolution),
}

/// One run's worth of negotiation state and collaborators.
pub struct Negotiator<'a> {
    sandbox: Arc<ScriptSandbox>,
    adapters: &'a AdapterRegistry,
    fetcher: &'a dyn FetchExecutor,
    max_iterations: u32,
    cancel: CancellationToken,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        sandbox: ScriptSandbox,
        adapters: &'a AdapterRegistry,
        fetcher: &'a dyn FetchExecutor,
        max_iterations: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sandbox: Arc::new(sandbox),
            adapters,
            fetcher,
            max_iterations: max_iterations.max(1),
            cancel,
        }
    }

    /// Run the loop to completion for `source`.
    #[instrument(skip_all, fields(provider = %source.provider))]
    pub async fn run(&self, source: &PlaySource) -> Result<Resolution> {
        let mut state = State::AwaitingScript(ResolutionRequest::initial(source));
        let mut fetches = 0u32;

        loop {
            state = match state {
                State::Done(resolution) => {
                    info!(
                        urls = resolution.urls.len(),
                        iterations = resolution.iterations,
                        fetches = resolution.fetches,
                        "Resolution complete"
                    );
                    return Ok(resolution);
                }
                State::AwaitingScript(request) => {
                    self.ensure_not_cancelled()?;
                    let response = self.ask_script(&request).await?;
                    self.decide(request, response, fetches)?
                }
                State::FetchRequested {
                    request,
                    instruction,
                    call_back_data,
                } => {
                    self.ensure_not_cancelled()?;
                    let html_data = self.perform_fetch(&instruction, source).await?;
                    fetches += 1;
                    State::AwaitingScript(request.next(html_data, call_back_data))
                }
            };
        }
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ResolveError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn ask_script(&self, request: &ResolutionRequest) -> Result<ResolutionResponse> {
        let arg = request.to_json()?;
        debug!(times = request.times, html_bytes = request.html_data.len(), "Invoking script");
        let sandbox = Arc::clone(&self.sandbox);
        let raw = tokio::task::spawn_blocking(move || sandbox.invoke(&arg))
            .await
            .map_err(|e| ResolveError::ScriptRuntime {
                message: format!("script task failed: {e}"),
                stack: None,
            })??;
        ResolutionResponse::parse(&raw)
    }

    fn decide(
        &self,
        request: ResolutionRequest,
        response: ResolutionResponse,
        fetches: u32,
    ) -> Result<State> {
        if response.done {
            return Ok(State::Done(Resolution {
                urls: response.urls,
                is_support_back: response.is_support_back,
                iterations: request.times,
                fetches,
            }));
        }

        if !response.fetch_url_new.is_usable() {
            return Err(ResolveError::protocol(format!(
                "iteration {} returned done=false without fetch_url_new.url",
                request.times
            )));
        }

        if request.times >= self.max_iterations {
            return Err(ResolveError::MaxIterationsExceeded(self.max_iterations));
        }

        debug!(
            times = request.times,
            url = %response.fetch_url_new.url,
            "Script requested fetch"
        );
        Ok(State::FetchRequested {
            instruction: response.fetch_url_new,
            call_back_data: response
                .call_back_data
                .unwrap_or_else(|| request.call_back_data.clone()),
            request,
        })
    }

    async fn perform_fetch(
        &self,
        instruction: &FetchInstruction,
        source: &PlaySource,
    ) -> Result<String> {
        let builder = self.adapters.builder_for(source.provider);
        let request = builder.build(instruction, source)?;
        debug!(adapter = builder.name(), method = %request.method, url = %request.url, "Fetching");

        let body = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ResolveError::Cancelled),
            body = self.fetcher.fetch(request) => body?,
        };

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
