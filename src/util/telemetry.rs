use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const SERVICE_NAME: &str = "chatters-ledger";
pub const TRACER_NAME: &str = "chatters-ledger-tracer";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Installed subscriber state. OTLP providers only exist when a collector was configured.
#[derive(Debug)]
pub struct Telemetry {
    logger_provider: Option<SdkLoggerProvider>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn init(filter: &str, collector_url: Option<&str>) -> TelemetryResult<Self> {
        let base_resource = base_attrs(SERVICE_NAME, env!("CARGO_PKG_VERSION"));

        let tracer_provider = collector_url
            .map(|url| build_tracer_provider(url, base_resource.clone()))
            .transpose()?;
        let logger_provider = collector_url
            .map(|url| build_logger_provider(url, base_resource.clone()))
            .transpose()?;

        let trace_layer = tracer_provider.as_ref().map(|provider| {
            global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(global::tracer(TRACER_NAME))
        });
        let log_layer = logger_provider
            .as_ref()
            .map(|provider| OpenTelemetryTracingBridge::new(provider));

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(log_layer)
            .with(EnvFilter::try_new(filter)?)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()?;

        Ok(Self {
            logger_provider,
            tracer_provider,
        })
    }

    pub fn shutdown(self) {
        if let Some(logger_provider) = self.logger_provider
            && let Err(e) = logger_provider.shutdown()
        {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Some(tracer_provider) = self.tracer_provider
            && let Err(e) = tracer_provider.shutdown()
        {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

pub fn build_logger_provider(
    collector_url: &str,
    base_resource: Resource,
) -> TelemetryResult<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

pub fn build_tracer_provider(
    collector_url: &str,
    base_resource: Resource,
) -> TelemetryResult<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: &'static str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name),
            KeyValue::new("service.version", version),
        ])
        .build()
}

pub type TelemetryResult<T> = core::result::Result<T, TelemetryErr>;

#[derive(Debug, Error)]
pub enum TelemetryErr {
    #[error(transparent)]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),
}
