// テーブル単位のクエリ群と CandidateStore 実装
mod digest;
mod post;


use async_trait::async_trait;
use sqlx::PgPool;

use super::CandidateStore;
use crate::digest::{Digest, DigestId, Post, PostId, UserId};

/// PostgreSQL-backed [`CandidateStore`].
///
/// Holds the single pool created at startup; every call borrows from it.
#[derive(Debug, Clone)]
pub struct PgCandidateStore {
    pool: PgPool,
}

impl PgCandidateStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateStore for PgCandidateStore {
    async fn fetch_candidates(&self, user_id: UserId) -> anyhow::Result<Vec<Post>> {
        post::PostDao::fetch_for_user(&self.pool, user_id).await
    }

    async fn create_digest(
        &self,
        user_id: UserId,
        post_ids: &[PostId],
    ) -> anyhow::Result<Option<Digest>> {
        digest::DigestDao::create(&self.pool, user_id, post_ids).await
    }

    async fn read_digest(&self, digest_id: DigestId) -> anyhow::Result<Option<Digest>> {
        digest::DigestDao::find(&self.pool, digest_id).await
    }
}
