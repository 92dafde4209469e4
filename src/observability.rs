pub(crate) mod tracing;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::config::Config;

/// トレーシングの初期化結果を保持し、終了時にスパンをフラッシュする。
#[derive(Debug, Clone)]
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
    shut_down: Arc<AtomicBool>,
}

impl Telemetry {
    /// 設定に従ってトレーシングを初期化する。2回目以降の呼び出しは既存の状態を返す。
    ///
    /// # Errors
    /// サブスクライバの初期化に失敗した場合はエラーを返す。
    pub fn new(config: &Config) -> Result<Self> {
        let tracer_provider = tracing::init(
            config.log_level(),
            config.otel_exporter_endpoint(),
            config.otel_sampling_ratio(),
        )?;
        Ok(Self {
            tracer_provider,
            shut_down: Arc::default(),
        })
    }

    /// OTLP を持たないハンドル。サブスクライバは初期化しない。
    #[cfg(test)]
    pub(crate) fn disabled() -> Self {
        Self {
            tracer_provider: None,
            shut_down: Arc::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// 未送信のスパンをエクスポーターへ流す。2回目以降とOTLP無効時は何もしない。
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(provider) = &self.tracer_provider {
            if let Err(error) = provider.shutdown() {
                ::tracing::warn!(error = %error, "failed to shut down tracer provider");
            }
        }
    }
}
