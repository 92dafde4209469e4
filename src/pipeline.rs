use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::Instrument;

use crate::cache::ResultCache;
use crate::digest::{Digest, UserId};
use crate::schema::validate_snapshot;
use crate::store::CandidateStore;

pub mod select;

use select::SelectionStrategy;

pub const DEFAULT_LIMIT: usize = 5;

/// Composes one digest per trigger: fetch, select, persist, publish.
///
/// Every collaborator is injected; the orchestrator owns no connections of its
/// own and performs no retries.
pub struct DigestOrchestrator {
    store: Arc<dyn CandidateStore>,
    selector: Arc<dyn SelectionStrategy>,
    cache: Arc<dyn ResultCache>,
    limit: usize,
    span: tracing::Span,
}

pub struct DigestOrchestratorBuilder {
    store: Option<Arc<dyn CandidateStore>>,
    selector: Option<Arc<dyn SelectionStrategy>>,
    cache: Option<Arc<dyn ResultCache>>,
    limit: usize,
    span: Option<tracing::Span>,
}

impl std::fmt::Debug for DigestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestOrchestrator")
            .field("strategy", &self.selector.name())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl DigestOrchestrator {
    #[must_use]
    pub fn builder() -> DigestOrchestratorBuilder {
        DigestOrchestratorBuilder::new()
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.selector.name()
    }

    /// Composes a digest for `user_id` with the configured limit.
    ///
    /// # Errors
    /// Store and cache failures are returned unchanged; nothing is retried.
    pub async fn compose(&self, user_id: UserId) -> Result<Digest> {
        self.compose_with_limit(user_id, self.limit).await
    }

    /// ユーザーのダイジェストを作成し、スナップショットをキャッシュに公開する。
    ///
    /// 選択結果が空の場合はストアに書き込まず、ID 0 の空ダイジェストを公開する。
    ///
    /// # Errors
    /// 候補取得・ダイジェスト作成・公開が失敗した場合や、スナップショットがスキーマに合わない場合はエラーを返す。
    pub async fn compose_with_limit(&self, user_id: UserId, limit: usize) -> Result<Digest> {
        let span = tracing::info_span!(
            parent: &self.span,
            "compose",
            user_id,
            limit,
            strategy = self.selector.name()
        );
        self.run(user_id, limit).instrument(span).await
    }

    async fn run(&self, user_id: UserId, limit: usize) -> Result<Digest> {
        let candidates = self
            .store
            .fetch_candidates(user_id)
            .await
            .with_context(|| format!("failed to fetch candidates for user {user_id}"))?;

        let selected = self.selector.select(&candidates, limit);
        tracing::debug!(
            candidate_count = candidates.len(),
            selected_count = selected.len(),
            "candidates selected"
        );

        let digest = if selected.is_empty() {
            tracing::info!("no posts selected, publishing empty digest");
            Digest::synthetic(user_id, Utc::now())
        } else {
            match self
                .store
                .create_digest(user_id, &selected)
                .await
                .with_context(|| format!("failed to create digest for user {user_id}"))?
            {
                Some(digest) => digest,
                None => {
                    tracing::warn!(
                        selected_count = selected.len(),
                        "store created no digest for a non-empty selection"
                    );
                    Digest::synthetic(user_id, Utc::now())
                }
            }
        };

        let snapshot = digest
            .to_snapshot()
            .context("failed to serialize digest snapshot")?;
        let validation = validate_snapshot(&snapshot);
        if !validation.valid {
            anyhow::bail!(
                "digest snapshot for user {user_id} failed schema validation: {}",
                validation.errors.join("; ")
            );
        }
        self.cache
            .publish(user_id, &snapshot)
            .await
            .with_context(|| format!("failed to publish digest for user {user_id}"))?;

        tracing::info!(
            digest_id = digest.id,
            post_count = digest.posts.len(),
            persisted = digest.is_persisted(),
            "digest published"
        );
        Ok(digest)
    }
}

impl DigestOrchestratorBuilder {
    fn new() -> Self {
        Self {
            store: None,
            selector: None,
            cache: None,
            limit: DEFAULT_LIMIT,
            span: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CandidateStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn SelectionStrategy>) -> Self {
        self.selector = Some(selector);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// 親スパン。未指定なら `digest_orchestrator` スパンを作る。
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// # Errors
    /// Returns an error when the store, selector or cache was not configured.
    pub fn build(self) -> Result<DigestOrchestrator> {
        Ok(DigestOrchestrator {
            store: self
                .store
                .context("store must be configured before build")?,
            selector: self
                .selector
                .context("selection strategy must be configured before build")?,
            cache: self
                .cache
                .context("result cache must be configured before build")?,
            limit: self.limit,
            span: self
                .span
                .unwrap_or_else(|| tracing::info_span!("digest_orchestrator")),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tracing_test::traced_test;

    use super::*;
    use crate::cache::{CacheError, CacheResult};
    use crate::digest::{DigestId, Post, PostId};
    use crate::pipeline::select::{SubscriptionCoverage, TopPopularity};

    type Calls = Arc<Mutex<Vec<&'static str>>>;

    struct RecordingStore {
        calls: Calls,
        candidates: Vec<Post>,
        created: Mutex<Vec<(UserId, Vec<PostId>)>>,
        fail_fetch: bool,
        digest_id: Option<DigestId>,
    }

    impl RecordingStore {
        fn new(calls: Calls, candidates: Vec<Post>) -> Self {
            Self {
                calls,
                candidates,
                created: Mutex::new(Vec::new()),
                fail_fetch: false,
                digest_id: None,
            }
        }

        fn failing(calls: Calls) -> Self {
            Self {
                fail_fetch: true,
                ..Self::new(calls, Vec::new())
            }
        }

        fn created(&self) -> Vec<(UserId, Vec<PostId>)> {
            self.created.lock().expect("created lock").clone()
        }
    }

    #[async_trait]
    impl CandidateStore for RecordingStore {
        async fn fetch_candidates(&self, _user_id: UserId) -> Result<Vec<Post>> {
            self.calls.lock().expect("calls lock").push("fetch");
            if self.fail_fetch {
                anyhow::bail!("connection refused");
            }
            Ok(self.candidates.clone())
        }

        async fn create_digest(
            &self,
            user_id: UserId,
            post_ids: &[PostId],
        ) -> Result<Option<Digest>> {
            self.calls.lock().expect("calls lock").push("create");
            let mut created = self.created.lock().expect("created lock");
            created.push((user_id, post_ids.to_vec()));
            let posts = post_ids
                .iter()
                .filter_map(|id| self.candidates.iter().find(|post| post.id == *id).cloned())
                .collect();
            Ok(Some(Digest {
                id: self
                    .digest_id
                    .unwrap_or_else(|| DigestId::try_from(created.len()).expect("small id")),
                user_id,
                timestamp: Utc::now(),
                posts,
            }))
        }

        async fn read_digest(&self, _digest_id: DigestId) -> Result<Option<Digest>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingCache {
        calls: Calls,
        published: Mutex<Vec<(UserId, String)>>,
        fail: bool,
    }

    impl RecordingCache {
        fn new(calls: Calls) -> Self {
            Self {
                calls,
                ..Self::default()
            }
        }

        fn published(&self) -> Vec<(UserId, String)> {
            self.published.lock().expect("published lock").clone()
        }
    }

    #[async_trait]
    impl ResultCache for RecordingCache {
        async fn publish(&self, user_id: UserId, snapshot: &str) -> CacheResult<()> {
            self.calls.lock().expect("calls lock").push("publish");
            if self.fail {
                return Err(CacheError::BackendError("READONLY".to_string()));
            }
            self.published
                .lock()
                .expect("published lock")
                .push((user_id, snapshot.to_string()));
            Ok(())
        }
    }

    fn football_posts() -> Vec<Post> {
        (1..=10)
            .map(|n| Post::new(n, 1, format!("match report {n}"), i32::try_from(n).expect("small")))
            .collect()
    }

    fn orchestrator(
        store: Arc<RecordingStore>,
        selector: Arc<dyn SelectionStrategy>,
        cache: Arc<RecordingCache>,
    ) -> DigestOrchestrator {
        DigestOrchestrator::builder()
            .with_store(store)
            .with_selector(selector)
            .with_cache(cache)
            .build()
            .expect("orchestrator builds")
    }

    #[tokio::test]
    async fn compose_runs_fetch_create_publish_in_order() {
        let calls: Calls = Arc::default();
        let store = Arc::new(RecordingStore::new(Arc::clone(&calls), football_posts()));
        let cache = Arc::new(RecordingCache::new(Arc::clone(&calls)));
        let orchestrator = orchestrator(Arc::clone(&store), Arc::new(TopPopularity), Arc::clone(&cache));

        let digest = orchestrator.compose(7).await.expect("compose succeeds");

        assert_eq!(*calls.lock().expect("calls lock"), vec!["fetch", "create", "publish"]);
        assert!(digest.is_persisted());
        assert_eq!(digest.post_ids(), vec![10, 9, 8, 7, 6]);
        assert_eq!(store.created(), vec![(7, vec![10, 9, 8, 7, 6])]);
    }

    #[tokio::test]
    async fn published_snapshot_matches_returned_digest() {
        let calls: Calls = Arc::default();
        let store = Arc::new(RecordingStore::new(Arc::clone(&calls), football_posts()));
        let cache = Arc::new(RecordingCache::new(Arc::clone(&calls)));
        let orchestrator = orchestrator(store, Arc::new(TopPopularity), Arc::clone(&cache));

        let digest = orchestrator.compose(7).await.expect("compose succeeds");

        let published = cache.published();
        assert_eq!(published.len(), 1);
        let (key, snapshot) = &published[0];
        assert_eq!(*key, 7);
        assert!(validate_snapshot(snapshot).valid);
        assert_eq!(Digest::from_snapshot(snapshot).expect("parses"), digest);
    }

    #[tokio::test]
    async fn zero_candidates_publish_synthetic_digest_without_creating() {
        let calls: Calls = Arc::default();
        let store = Arc::new(RecordingStore::new(Arc::clone(&calls), Vec::new()));
        let cache = Arc::new(RecordingCache::new(Arc::clone(&calls)));
        let orchestrator =
            orchestrator(Arc::clone(&store), Arc::new(SubscriptionCoverage), Arc::clone(&cache));

        let digest = orchestrator.compose(99).await.expect("compose succeeds");

        assert_eq!(*calls.lock().expect("calls lock"), vec!["fetch", "publish"]);
        assert!(store.created().is_empty());
        assert_eq!(digest.id, Digest::SENTINEL_ID);
        assert!(!digest.is_persisted());

        let (_, snapshot) = &cache.published()[0];
        let value: serde_json::Value = serde_json::from_str(snapshot).expect("json");
        assert_eq!(value["id"], 0);
        assert_eq!(value["user_id"], 99);
        assert_eq!(value["posts"], serde_json::json!([]));
        assert!(validate_snapshot(snapshot).valid);
    }

    #[tokio::test]
    async fn zero_limit_behaves_like_no_candidates() {
        let calls: Calls = Arc::default();
        let store = Arc::new(RecordingStore::new(Arc::clone(&calls), football_posts()));
        let cache = Arc::new(RecordingCache::new(Arc::clone(&calls)));
        let orchestrator = orchestrator(Arc::clone(&store), Arc::new(TopPopularity), cache);

        let digest = orchestrator
            .compose_with_limit(3, 0)
            .await
            .expect("compose succeeds");

        assert!(digest.posts.is_empty());
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn post_count_is_bounded_by_candidates() {
        let calls: Calls = Arc::default();
        let few = football_posts().into_iter().take(2).collect();
        let store = Arc::new(RecordingStore::new(Arc::clone(&calls), few));
        let cache = Arc::new(RecordingCache::new(Arc::clone(&calls)));
        let orchestrator = orchestrator(store, Arc::new(SubscriptionCoverage), cache);

        let digest = orchestrator.compose(5).await.expect("compose succeeds");

        assert_eq!(digest.user_id, 5);
        assert_eq!(digest.posts.len(), 2);
    }

    #[tokio::test]
    async fn fetch_error_propagates_before_publishing() {
        let calls: Calls = Arc::default();
        let store = Arc::new(RecordingStore::failing(Arc::clone(&calls)));
        let cache = Arc::new(RecordingCache::new(Arc::clone(&calls)));
        let orchestrator = orchestrator(store, Arc::new(TopPopularity), Arc::clone(&cache));

        let err = orchestrator.compose(1).await.expect_err("fetch fails");

        assert!(format!("{err:#}").contains("connection refused"));
        assert_eq!(*calls.lock().expect("calls lock"), vec!["fetch"]);
        assert!(cache.published().is_empty());
    }

    #[tokio::test]
    async fn cache_error_propagates_after_digest_was_created() {
        let calls: Calls = Arc::default();
        let store = Arc::new(RecordingStore::new(Arc::clone(&calls), football_posts()));
        let cache = Arc::new(RecordingCache {
            fail: true,
            ..RecordingCache::new(Arc::clone(&calls))
        });
        let orchestrator = orchestrator(Arc::clone(&store), Arc::new(TopPopularity), cache);

        let err = orchestrator.compose(1).await.expect_err("publish fails");

        assert!(err.downcast_ref::<CacheError>().is_some());
        assert_eq!(store.created().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_failing_schema_is_not_published() {
        let calls: Calls = Arc::default();
        let store = Arc::new(RecordingStore {
            digest_id: Some(-1),
            ..RecordingStore::new(Arc::clone(&calls), football_posts())
        });
        let cache = Arc::new(RecordingCache::new(Arc::clone(&calls)));
        let orchestrator = orchestrator(store, Arc::new(TopPopularity), Arc::clone(&cache));

        let err = orchestrator.compose(4).await.expect_err("schema rejects negative id");

        assert!(err.to_string().contains("failed schema validation"));
        assert_eq!(*calls.lock().expect("calls lock"), vec!["fetch", "create"]);
        assert!(cache.published().is_empty());
    }

    #[test]
    fn build_requires_every_collaborator() {
        let err = DigestOrchestrator::builder()
            .with_selector(Arc::new(TopPopularity))
            .build()
            .expect_err("store is missing");
        assert!(err.to_string().contains("store must be configured"));
    }

    #[test]
    fn builder_defaults_to_five_posts() {
        let calls: Calls = Arc::default();
        let orchestrator = orchestrator(
            Arc::new(RecordingStore::new(Arc::clone(&calls), Vec::new())),
            Arc::new(SubscriptionCoverage),
            Arc::new(RecordingCache::new(calls)),
        );
        assert_eq!(orchestrator.limit(), DEFAULT_LIMIT);
        assert_eq!(orchestrator.strategy_name(), "subscription_coverage");
    }

    #[tokio::test]
    #[traced_test]
    async fn compose_logs_under_injected_span() {
        let calls: Calls = Arc::default();
        let orchestrator = DigestOrchestrator::builder()
            .with_store(Arc::new(RecordingStore::new(Arc::clone(&calls), football_posts())))
            .with_selector(Arc::new(TopPopularity))
            .with_cache(Arc::new(RecordingCache::new(calls)))
            .with_span(tracing::info_span!("worker_under_test"))
            .build()
            .expect("orchestrator builds");

        orchestrator.compose(42).await.expect("compose succeeds");

        assert!(logs_contain("digest published"));
        assert!(logs_contain("worker_under_test"));
        assert!(logs_contain("user_id=42"));
    }
}
