use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::subscriber::DefaultGuard;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable consulted when `RUST_LOG` is unset.
pub const LOG_ENV: &str = "GEMMBENCH_LOG";

/// One formatted event, handed to the hook installed with [`set_log_hook`].
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub ts: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Names of the enclosing spans, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<JsonValue>,
}

type LogHook = Arc<dyn Fn(&LogRecord) + Send + Sync>;

static LOG_HOOK: OnceCell<LogHook> = OnceCell::new();

pub struct LoggingGuard {
    _guard: Option<DefaultGuard>,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Write human-readable lines to stderr.
    pub console: bool,
    /// Overrides the filter directive taken from the environment.
    pub filter: Option<String>,
    pub ansi: bool,
}

/// Installs `hook` for every event that passes the filter. Only the first call wins.
pub fn set_log_hook<F>(hook: F)
where
    F: Fn(&LogRecord) + Send + Sync + 'static,
{
    let _ = LOG_HOOK.set(Arc::new(hook));
}

fn env_filter(opts: &LoggingOptions) -> EnvFilter {
    if let Some(directive) = opts.filter.as_deref() {
        if let Ok(filter) = EnvFilter::try_new(directive) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Routes `log` and `tracing` events through a registry with an env filter,
/// an optional stderr formatter and the record hook.
///
/// When a global subscriber already exists (tests, embedding), the subscriber
/// is installed for the current thread only and removed when the guard drops.
pub fn init_logging(opts: LoggingOptions) -> LoggingGuard {
    let _ = LogTracer::init();

    let build_subscriber = || {
        let console = opts.console.then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(opts.ansi)
        });
        tracing_subscriber::registry()
            .with(env_filter(&opts))
            .with(console)
            .with(HookLayer)
    };

    let guard = match tracing::subscriber::set_global_default(build_subscriber()) {
        Ok(()) => None,
        Err(_) => Some(tracing::subscriber::set_default(build_subscriber())),
    };

    LoggingGuard { _guard: guard }
}

struct HookLayer;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl<S> Layer<S> for HookLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let Some(hook) = LOG_HOOK.get() else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let spans = ctx
            .event_scope(event)
            .map(|scope| scope.from_root().map(|span| span.name().to_string()).collect())
            .unwrap_or_default();

        // log records carry their metadata as `log.*` fields
        let meta = event.metadata();
        let target = visitor
            .log_target
            .take()
            .unwrap_or_else(|| meta.target().to_string());
        let record = LogRecord {
            ts: now_rfc3339(),
            level: meta.level().to_string(),
            target,
            message: visitor.message.unwrap_or_else(|| meta.name().to_string()),
            spans,
            fields: visitor
                .fields
                .filter(|obj| obj.as_object().map(|m| !m.is_empty()).unwrap_or(false)),
        };
        hook(&record);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    log_target: Option<String>,
    fields: Option<JsonValue>,
}

impl JsonVisitor {
    fn insert(&mut self, name: &str, value: JsonValue) {
        if name == "message" {
            self.message = Some(match value {
                JsonValue::String(s) => s,
                other => other.to_string(),
            });
            return;
        }
        if name == "log.target" {
            self.log_target = value.as_str().map(str::to_string);
            return;
        }
        if name.starts_with("log.") {
            return;
        }
        let obj = self
            .fields
            .get_or_insert_with(|| JsonValue::Object(Default::default()));
        if let JsonValue::Object(map) = obj {
            map.insert(name.to_string(), value);
        }
    }
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.insert(field.name(), JsonValue::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.insert(field.name(), JsonValue::String(value.to_string()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field.name(), JsonValue::from(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field.name(), JsonValue::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field.name(), JsonValue::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static CAPTURED: Mutex<Vec<LogRecord>> = Mutex::new(Vec::new());

    #[test]
    fn hook_receives_tracing_and_log_events() {
        set_log_hook(|rec: &LogRecord| CAPTURED.lock().unwrap().push(rec.clone()));
        let _guard = init_logging(LoggingOptions {
            filter: Some("debug".to_string()),
            ..LoggingOptions::default()
        });

        {
            let _span = tracing::info_span!("dispatch", label = "matmul").entered();
            tracing::info!(groups = 4u64, "hello world");
        }
        log::warn!("from log");

        let items = CAPTURED.lock().unwrap();
        let hello = items
            .iter()
            .find(|r| r.message.contains("hello world"))
            .expect("tracing event");
        assert_eq!(hello.spans, vec!["dispatch".to_string()]);
        assert_eq!(hello.fields.as_ref().unwrap()["groups"], serde_json::json!(4));
        assert!(items.iter().any(|r| r.message == "from log" && r.level == "WARN"));
    }
}
