use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context as _, Result};
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider};
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::{logs::SdkLoggerProvider, metrics::SdkMeterProvider, trace::SdkTracerProvider};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

const SERVICE_NAME: &str = "service-adaptor";

/// Keeps whichever telemetry backend `init_tracing` installed.
pub enum TelemetryGuard {
    Otlp(Telemetry),
    File(FileTelemetry),
}

impl TelemetryGuard {
    /// Request instrumentation matching this backend: OTLP spans plus
    /// metrics, or metrics and request events only.
    pub fn request_telemetry(&self) -> RequestTelemetry {
        match self {
            TelemetryGuard::Otlp(t) => RequestTelemetry::Traced {
                tracer_provider: t.tracer_provider.clone(),
                metrics: RequestMetrics::new(&t.meter_provider.meter(SERVICE_NAME)),
            },
            TelemetryGuard::File(_) => RequestTelemetry::Metrics(RequestMetrics::global()),
        }
    }

    /// Flush and stop the OTLP providers. File logging needs nothing.
    pub fn shutdown(&self) {
        if let TelemetryGuard::Otlp(t) = self {
            if let Err(err) = t.tracer_provider.shutdown() {
                eprintln!("tracer provider shutdown failed: {err}");
            }
            if let Err(err) = t.meter_provider.shutdown() {
                eprintln!("meter provider shutdown failed: {err}");
            }
            if let Err(err) = t.logger_provider.shutdown() {
                eprintln!("logger provider shutdown failed: {err}");
            }
        }
    }
}

/// Install the global subscriber: OTLP export when an endpoint is given,
/// rolling files under `root` otherwise.
pub fn init_tracing(
    root: PathBuf,
    log_file: String,
    event_file: String,
    log_level: String,
    otel_logs_endpoint: Option<String>,
    otel_events_endpoint: Option<String>,
) -> Result<TelemetryGuard> {
    match (otel_logs_endpoint, otel_events_endpoint) {
        (None, None) => Ok(TelemetryGuard::File(FileTelemetry::init_files(
            &log_level,
            root.join(&log_file),
            root.join(&event_file),
        )?)),
        (logs, events) => {
            let logs = logs.or_else(|| events.clone()).unwrap_or_default();
            let events = events.unwrap_or_else(|| logs.clone());
            Ok(TelemetryGuard::Otlp(Telemetry::init(&log_level, &logs, &logs, &events)?))
        }
    }
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();
fn get_resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name(SERVICE_NAME).build())
        .clone()
}

fn init_logs(end_point: &str) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()
        .context("log exporter")?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_traces(end_point: &str) -> Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()
        .context("span exporter")?;
    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_metrics(end_point: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()
        .context("metric exporter")?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn filter(directives: &str, extra: &[&str]) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(directives).with_context(|| format!("bad log filter `{directives}`"))?;
    for directive in extra {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Per-request counters and latency, one JSON `request` event per request.
pub struct RequestMetrics {
    pub requests_started: Counter<u64>,
    pub requests_succeeded: Counter<u64>,
    pub requests_failed: Counter<u64>,
    pub request_latency_ms: Histogram<f64>,
}

impl RequestMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            requests_started: meter
                .u64_counter("requests_started")
                .with_description("Total requests started")
                .build(),
            requests_succeeded: meter.u64_counter("requests_succeeded").build(),
            requests_failed: meter.u64_counter("requests_failed").build(),
            request_latency_ms: meter
                .f64_histogram("request_latency_ms")
                .with_description("Latency per request in ms")
                .with_unit("ms")
                .build(),
        }
    }

    /// Metrics on the global meter provider (a no-op one unless OTLP is up).
    pub fn global() -> Self {
        Self::new(&global::meter(SERVICE_NAME))
    }

    /// Wrap a request with logs and metrics. Ends with one event on the
    /// `request` target, which the file backend writes as a JSON line.
    pub async fn instrument_request<F, Fut, T, E>(&self, name: &str, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.requests_started.add(1, &[]);
        let start = Instant::now();

        let result = handler().await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        self.request_latency_ms.record(elapsed, &[]);

        match &result {
            Ok(_) => {
                self.requests_succeeded.add(1, &[]);
                info!("request `{}` succeeded in {} ms", name, elapsed);
            }
            Err(err) => {
                self.requests_failed.add(1, &[]);
                error!(error = %err, "request `{}` failed in {} ms", name, elapsed);
            }
        }

        tracing::event!(
            target: "request",
            tracing::Level::INFO,
            request = name,
            latency_ms = elapsed,
            status = if result.is_ok() { "ok" } else { "error" },
        );

        result
    }
}

/// How requests are measured.
pub enum RequestTelemetry {
    Metrics(RequestMetrics),
    /// Each request also runs inside an OTLP span.
    Traced {
        tracer_provider: SdkTracerProvider,
        metrics: RequestMetrics,
    },
}

impl RequestTelemetry {
    pub fn global() -> Self {
        RequestTelemetry::Metrics(RequestMetrics::global())
    }

    pub fn metrics(&self) -> &RequestMetrics {
        match self {
            RequestTelemetry::Metrics(metrics) | RequestTelemetry::Traced { metrics, .. } => metrics,
        }
    }

    /// [`RequestMetrics::instrument_request`], inside a span when tracing is on.
    pub async fn instrument_request<F, Fut, T, E>(&self, name: &str, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match self {
            RequestTelemetry::Metrics(metrics) => metrics.instrument_request(name, handler).await,
            RequestTelemetry::Traced {
                tracer_provider,
                metrics,
            } => {
                let span = tracer_provider.tracer(SERVICE_NAME).start(name.to_string());
                let cx: Context = Context::current_with_span(span);
                metrics
                    .instrument_request(name, || opentelemetry::trace::FutureExt::with_context(handler(), cx))
                    .await
            }
        }
    }
}

/// OTLP logs, traces and metrics.
pub struct Telemetry {
    pub logger_provider: SdkLoggerProvider,
    pub tracer_provider: SdkTracerProvider,
    pub meter_provider: SdkMeterProvider,
}

impl Telemetry {
    pub fn init(log_level: &str, logger_endpoint: &str, tracer_endpoint: &str, meter_endpoint: &str) -> Result<Self> {
        let logger_provider = init_logs(logger_endpoint)?;
        let tracer_provider = init_traces(tracer_endpoint)?;
        let meter_provider = init_metrics(meter_endpoint)?;

        // the exporters' own HTTP stacks must not feed back into the bridge
        let otel_logs_layer = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(filter(
            log_level,
            &["hyper=off", "tonic=off", "h2=off", "reqwest=off"],
        )?);
        let fmt_layer = fmt::layer()
            .with_thread_names(true)
            .with_filter(filter(log_level, &["opentelemetry=debug"])?);

        Registry::default()
            .with(otel_logs_layer)
            .with(fmt_layer)
            .try_init()?;

        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        Ok(Telemetry {
            logger_provider,
            tracer_provider,
            meter_provider,
        })
    }
}

/// Rolling text log plus a rolling JSON file of request events.
pub struct FileTelemetry;

fn appender(path: &Path) -> Result<RollingFileAppender> {
    let dir = path
        .parent()
        .with_context(|| format!("log path `{}` has no directory", path.display()))?;
    let file = path
        .file_name()
        .with_context(|| format!("log path `{}` has no file name", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(RollingFileAppender::new(Rotation::DAILY, dir, file))
}

impl FileTelemetry {
    /// - `log_level` is an `EnvFilter` directive (e.g. `"info"`).
    /// - `log_file` is the rolling text log.
    /// - `event_file` is the rolling JSON request log.
    pub fn init_files(log_level: &str, log_file: PathBuf, event_file: PathBuf) -> Result<Self> {
        let txt_layer = fmt::Layer::default()
            .with_writer(appender(&log_file)?)
            .with_ansi(false)
            .with_filter(filter(log_level, &[])?);

        let json_layer = fmt::layer()
            .json()
            .with_writer(appender(&event_file)?)
            .with_target(true)
            .with_filter(filter("request=info", &[])?);

        Registry::default()
            .with(txt_layer)
            .with(json_layer)
            .try_init()?;

        Ok(FileTelemetry)
    }
}
