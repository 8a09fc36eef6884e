//! Script sandbox (rquickjs)
//!
//! Runs provider scripts in a fresh `QuickJS` runtime per resolution run.
//! Scripts get pure computation only: no filesystem, network, module loader
//! or timers. All I/O stays on the host side and is driven by the
//! negotiation loop.
//!
//! Host helpers installed into every context:
//! - `console.log/info/debug/warn/error` forwarded to `tracing`
//! - `atob` / `btoa` (standard base64, binary strings)

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Object, Runtime, Type, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ResolveError, Result};

/// Resource limits applied to one sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Heap limit in bytes.
    pub memory_limit: usize,
    /// Stack limit in bytes.
    pub max_stack_size: usize,
    /// Wall-clock budget for loading the script and for each invocation.
    pub timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit: 32 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
            timeout: Duration::from_secs(5),
        }
    }
}

const RUNNING: u8 = 0;
const TIMED_OUT: u8 = 1;
const CANCELLED: u8 = 2;

/// Decides when the interrupt handler stops a running script.
struct Watchdog {
    deadline: Mutex<Option<Instant>>,
    cancel: Option<CancellationToken>,
    tripped: AtomicU8,
}

impl Watchdog {
    fn new(cancel: Option<CancellationToken>) -> Self {
        Self {
            deadline: Mutex::new(None),
            cancel,
            tripped: AtomicU8::new(RUNNING),
        }
    }

    fn arm(&self, timeout: Duration) {
        self.tripped.store(RUNNING, Ordering::SeqCst);
        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = Some(Instant::now() + timeout);
        }
    }

    fn disarm(&self) {
        if let Ok(mut deadline) = self.deadline.lock() {
            *deadline = None;
        }
    }

    fn should_interrupt(&self) -> bool {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            self.tripped.store(CANCELLED, Ordering::SeqCst);
            return true;
        }
        let expired = self
            .deadline
            .lock()
            .ok()
            .and_then(|d| *d)
            .is_some_and(|d| Instant::now() >= d);
        if expired {
            self.tripped.store(TIMED_OUT, Ordering::SeqCst);
        }
        expired
    }

    fn take_trip(&self) -> u8 {
        self.tripped.swap(RUNNING, Ordering::SeqCst)
    }
}

/// Exception details copied out of the JS context.
struct ScriptFault {
    message: String,
    stack: Option<String>,
}

impl ScriptFault {
    fn from_caught(caught: CaughtError<'_>) -> Self {
        match caught {
            CaughtError::Exception(exc) => Self {
                message: exc.message().unwrap_or_else(|| "exception".to_string()),
                stack: exc.stack().filter(|s| !s.is_empty()),
            },
            CaughtError::Value(val) => Self {
                message: format!(
                    "script threw {}",
                    val.as_string()
                        .and_then(|s| s.to_string().ok())
                        .unwrap_or_else(|| format!("a {:?} value", val.type_of()))
                ),
                stack: None,
            },
            CaughtError::Error(err) => Self {
                message: err.to_string(),
                stack: None,
            },
        }
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Load,
    Invoke,
}

/// One provider script, loaded into its own runtime.
///
/// Built once per run by [`ScriptSandbox::load`]; nothing survives into the
/// next run.
pub struct ScriptSandbox {
    context: Context,
    _runtime: Runtime,
    entry_point: String,
    limits: SandboxLimits,
    watchdog: Arc<Watchdog>,
}

impl ScriptSandbox {
    /// Create a runtime, evaluate `source` once and check that
    /// `entry_point` is a global function.
    pub fn load(
        source: &str,
        entry_point: &str,
        limits: SandboxLimits,
        cancel: Option<CancellationToken>,
    ) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(ResolveError::ScriptLoad("script is empty".to_string()));
        }

        let runtime = Runtime::new()
            .map_err(|e| ResolveError::ScriptLoad(format!("failed to create JS runtime: {e}")))?;
        runtime.set_memory_limit(limits.memory_limit);
        runtime.set_max_stack_size(limits.max_stack_size);

        let watchdog = Arc::new(Watchdog::new(cancel));
        let handler_watchdog = Arc::clone(&watchdog);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            handler_watchdog.should_interrupt()
        })));

        let context = Context::full(&runtime)
            .map_err(|e| ResolveError::ScriptLoad(format!("failed to create JS context: {e}")))?;

        let sandbox = Self {
            context,
            _runtime: runtime,
            entry_point: entry_point.to_string(),
            limits,
            watchdog,
        };

        debug!(chars = source.len(), entry_point, "Loading provider script");

        sandbox.watchdog.arm(limits.timeout);
        let loaded = sandbox.context.with(|ctx| -> std::result::Result<bool, ScriptFault> {
            install_host_helpers(&ctx)
                .catch(&ctx)
                .map_err(ScriptFault::from_caught)?;
            ctx.eval::<(), _>(source)
                .catch(&ctx)
                .map_err(ScriptFault::from_caught)?;
            Ok(ctx
                .globals()
                .get::<_, Value>(entry_point)
                .is_ok_and(|v| v.is_function()))
        });
        sandbox.watchdog.disarm();

        match loaded {
            Ok(true) => Ok(sandbox),
            Ok(false) => Err(ResolveError::ScriptLoad(format!(
                "script does not define a function named '{entry_point}'"
            ))),
            Err(fault) => Err(sandbox.classify(fault, Phase::Load)),
        }
    }

    /// Name of the function [`invoke`](Self::invoke) calls.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Call the entry point with one string argument.
    ///
    /// String results are returned as is; objects and arrays are
    /// JSON-stringified; anything else is rendered as text.
    pub fn invoke(&self, arg: &str) -> Result<String> {
        let entry_point = self.entry_point.as_str();

        self.watchdog.arm(self.limits.timeout);
        let outcome = self.context.with(|ctx| -> std::result::Result<String, ScriptFault> {
            let func: Function = ctx
                .globals()
                .get(entry_point)
                .catch(&ctx)
                .map_err(ScriptFault::from_caught)?;
            let value: Value = func
                .call((arg.to_string(),))
                .catch(&ctx)
                .map_err(ScriptFault::from_caught)?;
            render(&ctx, value)
                .catch(&ctx)
                .map_err(ScriptFault::from_caught)
        });
        self.watchdog.disarm();

        match outcome {
            Ok(text) => {
                self.watchdog.take_trip();
                Ok(text)
            }
            Err(fault) => Err(self.classify(fault, Phase::Invoke)),
        }
    }

    fn classify(&self, fault: ScriptFault, phase: Phase) -> ResolveError {
        match self.watchdog.take_trip() {
            TIMED_OUT => ResolveError::ScriptTimeout(self.limits.timeout),
            CANCELLED => ResolveError::Cancelled,
            _ => match phase {
                Phase::Load => ResolveError::ScriptLoad(match fault.stack {
                    Some(stack) => format!("{}\n{stack}", fault.message),
                    None => fault.message,
                }),
                Phase::Invoke => ResolveError::ScriptRuntime {
                    message: fault.message,
                    stack: fault.stack,
                },
            },
        }
    }
}

/// Convert an entry point's return value into the string handed to the
/// protocol parser.
fn render<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<String> {
    let text = match value.type_of() {
        Type::String => value.get::<String>()?,
        Type::Object | Type::Array => {
            let json: Object = ctx.globals().get("JSON")?;
            let stringify: Function = json.get("stringify")?;
            stringify.call((value,))?
        }
        Type::Undefined => "undefined".to_string(),
        Type::Null => "null".to_string(),
        Type::Bool => value.get::<bool>()?.to_string(),
        Type::Int => value.get::<i32>()?.to_string(),
        Type::Float => value.get::<f64>()?.to_string(),
        other => format!("<{other:?}>"),
    };
    Ok(text)
}

const HOST_SHIM: &str = r"
    (function (g) {
        var emit = g.__host_log;
        var fmt = function (args) {
            return Array.prototype.map.call(args, function (a) {
                if (typeof a === 'string') return a;
                try { return JSON.stringify(a); } catch (e) { return String(a); }
            }).join(' ');
        };
        g.console = {
            log: function () { emit('info', fmt(arguments)); },
            info: function () { emit('info', fmt(arguments)); },
            debug: function () { emit('debug', fmt(arguments)); },
            warn: function () { emit('warn', fmt(arguments)); },
            error: function () { emit('error', fmt(arguments)); }
        };
        var decode = g.__host_atob;
        var encode = g.__host_btoa;
        g.atob = function (s) {
            var out = decode(String(s));
            if (out === null) throw new Error('atob: invalid base64 input');
            return out;
        };
        g.btoa = function (s) {
            var out = encode(String(s));
            if (out === null) throw new Error('btoa: character out of Latin1 range');
            return out;
        };
        delete g.__host_log;
        delete g.__host_atob;
        delete g.__host_btoa;
    })(globalThis);
";

fn install_host_helpers(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        "__host_log",
        Function::new(ctx.clone(), |level: String, message: String| {
            match level.as_str() {
                "error" | "warn" => warn!(target: "playurl::script", "{message}"),
                "info" => info!(target: "playurl::script", "{message}"),
                _ => debug!(target: "playurl::script", "{message}"),
            }
        })?,
    )?;
    globals.set("__host_atob", Function::new(ctx.clone(), base64_decode)?)?;
    globals.set("__host_btoa", Function::new(ctx.clone(), base64_encode)?)?;

    ctx.eval::<(), _>(HOST_SHIM)
}

/// Base64 to a binary string (one char per byte), `None` if malformed.
fn base64_decode(input: String) -> Option<String> {
    let cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD_NO_PAD
        .decode(cleaned.trim_end_matches('='))
        .ok()?;
    Some(bytes.into_iter().map(char::from).collect())
}

/// Binary string to base64, `None` if a char is above U+00FF.
fn base64_encode(input: String) -> Option<String> {
    let bytes = input
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()?;
    Some(STANDARD.encode(bytes))
}
