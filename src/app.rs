use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{
    cache::RedisResultCache,
    config::Config,
    observability::Telemetry,
    pipeline::DigestOrchestrator,
    queue::{RabbitTriggerSource, TriggerLoop},
    store::PgCandidateStore,
};

/// 起動時に一度だけ作られる接続と、それを使うオーケストレータの集合。
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    orchestrator: Arc<DigestOrchestrator>,
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化する。
    ///
    /// データベース接続は遅延確立、Redis 接続はこの時点で確立する。
    ///
    /// # Errors
    /// Telemetry の初期化か Redis 接続が失敗した場合はエラーを返す。
    pub async fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new(&config)?;
        let store = Arc::new(PgCandidateStore::new(database_pool(&config)));
        let cache = Arc::new(
            RedisResultCache::connect(config.redis_url())
                .await
                .context("failed to connect result cache")?,
        );

        let orchestrator = DigestOrchestrator::builder()
            .with_store(store)
            .with_selector(config.selection_strategy().build())
            .with_cache(cache)
            .with_limit(config.digest_limit())
            .with_span(tracing::info_span!(
                "digest_orchestrator",
                strategy = %config.selection_strategy()
            ))
            .build()?;

        Ok(Self {
            config,
            telemetry,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// 設定されたキューの購読を開始し、トリガーループを組み立てる。
    ///
    /// # Errors
    /// RabbitMQ への接続・キュー宣言・購読開始に失敗した場合はエラーを返す。
    async fn trigger_loop(&self) -> Result<TriggerLoop<RabbitTriggerSource>> {
        let source =
            RabbitTriggerSource::connect(self.config.rabbit_uri(), self.config.rabbit_queue())
                .await
                .context("failed to start trigger consumer")?;
        Ok(TriggerLoop::new(source, Arc::clone(&self.orchestrator)))
    }

    /// `shutdown` が解決するかキューが尽きるまでトリガーを処理する。
    ///
    /// 購読開始の失敗を含め、どの経路で終わっても Telemetry を閉じてから戻る。
    ///
    /// # Errors
    /// 購読開始またはループ内の処理が失敗した場合はエラーを返す。
    pub async fn run<F>(&self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        let outcome = match self.trigger_loop().await {
            Ok(worker) => worker.run(shutdown).await,
            Err(error) => Err(error),
        };
        self.telemetry.shutdown();
        outcome
    }
}

/// 設定値からコネクションプールを構成する。接続は最初の利用時に確立される。
#[must_use]
pub fn database_pool(config: &Config) -> PgPool {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(config.db_acquire_timeout())
        .test_before_acquire(true)
        .connect_lazy_with(config.database().clone())
}
