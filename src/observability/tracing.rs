use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use tracing::{Level, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "digest-worker";

static TRACING_INIT: OnceCell<Option<SdkTracerProvider>> = OnceCell::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// `RUST_LOG` が設定されていればそれを優先し、なければ `default_level` を使う。
/// `otel_endpoint` が指定されている場合は OTLP エクスポーターにもスパンを送る。
/// エクスポーターの初期化に失敗した場合は fmt レイヤーのみで続行する。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub(crate) fn init(
    default_level: Level,
    otel_endpoint: Option<&str>,
    sampling_ratio: f64,
) -> Result<Option<SdkTracerProvider>> {
    let provider = TRACING_INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(default_level).into())
            .from_env_lossy();

        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();

        let (provider, init_error) = match otel_endpoint {
            Some(endpoint) => match init_tracer_provider(endpoint, sampling_ratio) {
                Ok(provider) => (Some(provider), None),
                Err(error) => (None, Some(error)),
            },
            None => (None, None),
        };

        let otel_layer = provider.as_ref().map(|provider| {
            tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME))
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()
            .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;

        match (&provider, init_error) {
            (Some(_), _) => info!(otel_enabled = true, endpoint = ?otel_endpoint, "tracing initialized with OpenTelemetry"),
            (None, Some(error)) => warn!(otel_enabled = false, error = %error, "tracing initialized without OpenTelemetry (init failed)"),
            (None, None) => info!(otel_enabled = false, "standard tracing initialized"),
        }

        Ok::<_, Error>(provider)
    })?;
    Ok(provider.clone())
}

/// OTLPエクスポーター経由のトレーサープロバイダーを作り、グローバルに登録する。
fn init_tracer_provider(endpoint: &str, sampling_ratio: f64) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    Ok(tracer_provider)
}
