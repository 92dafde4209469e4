use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::post::row_to_post;
use crate::digest::{Digest, DigestId, PostId, UserId};

pub(crate) struct DigestDao;

impl DigestDao {
    /// ダイジェスト行と投稿の関連付けを1トランザクションで作成する。
    ///
    /// 投稿は `post_ids` で渡された順序で返す。
    ///
    /// # Returns
    /// - `Ok(Some(digest))`: 作成成功
    /// - `Ok(None)`: `post_ids` が空のため何もしなかった
    /// - `Err`: データベースエラー
    pub async fn create(
        pool: &PgPool,
        user_id: UserId,
        post_ids: &[PostId],
    ) -> Result<Option<Digest>> {
        if post_ids.is_empty() {
            return Ok(None);
        }

        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        let row = sqlx::query(
            r"
            INSERT INTO digests (user_id)
            VALUES ($1)
            RETURNING id, created_at
            ",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert digest")?;

        let digest_id: DigestId = row.try_get("id").context("failed to get digest id")?;
        let timestamp: DateTime<Utc> = row
            .try_get("created_at")
            .context("failed to get digest created_at")?;

        sqlx::query(
            r"
            INSERT INTO posts_digests (post_id, digest_id)
            SELECT post_id, $2
            FROM UNNEST($1::BIGINT[]) AS post_id
            ",
        )
        .bind(post_ids)
        .bind(digest_id)
        .execute(&mut *tx)
        .await
        .context("failed to insert digest post associations")?;

        let rows = sqlx::query(
            r"
            SELECT id, subscription_id, content, popularity
            FROM posts
            WHERE id = ANY($1)
            ORDER BY array_position($1::BIGINT[], id)
            ",
        )
        .bind(post_ids)
        .fetch_all(&mut *tx)
        .await
        .context("failed to load digest posts")?;

        let posts = rows.iter().map(row_to_post).collect::<Result<Vec<_>>>()?;

        tx.commit().await.context("failed to commit digest")?;

        Ok(Some(Digest {
            id: digest_id,
            user_id,
            timestamp,
            posts,
        }))
    }

    /// IDでダイジェストを読み込む。存在しない場合は `None` を返す。
    pub async fn find(pool: &PgPool, digest_id: DigestId) -> Result<Option<Digest>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, created_at
            FROM digests
            WHERE id = $1
            ",
        )
        .bind(digest_id)
        .fetch_optional(pool)
        .await
        .context("failed to read digest")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r"
            SELECT p.id, p.subscription_id, p.content, p.popularity
            FROM posts_digests pd
            JOIN posts p ON p.id = pd.post_id
            WHERE pd.digest_id = $1
            ORDER BY p.popularity DESC, p.id ASC
            ",
        )
        .bind(digest_id)
        .fetch_all(pool)
        .await
        .context("failed to read digest posts")?;

        Ok(Some(Digest {
            id: row.try_get("id").context("failed to get digest id")?,
            user_id: row.try_get("user_id").context("failed to get digest user_id")?,
            timestamp: row
                .try_get("created_at")
                .context("failed to get digest created_at")?,
            posts: rows.iter().map(row_to_post).collect::<Result<Vec<_>>>()?,
        }))
    }
}
