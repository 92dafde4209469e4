//! Candidate store abstraction and its PostgreSQL implementation.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::digest::{Digest, DigestId, Post, PostId, UserId};

pub mod dao;

pub use dao::PgCandidateStore;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// All posts under the subscriptions `user_id` follows.
    async fn fetch_candidates(&self, user_id: UserId) -> Result<Vec<Post>>;

    /// Atomically writes a digest row and its post associations.
    ///
    /// Returns `Ok(None)` without touching storage when `post_ids` is empty.
    async fn create_digest(&self, user_id: UserId, post_ids: &[PostId]) -> Result<Option<Digest>>;

    async fn read_digest(&self, digest_id: DigestId) -> Result<Option<Digest>>;
}

/// スキーマのマイグレーションを適用する。
///
/// # Errors
/// マイグレーションの実行に失敗した場合はエラーを返す。
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply digest schema migrations")
}
