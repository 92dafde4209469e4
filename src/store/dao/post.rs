use anyhow::{Context, Result};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::digest::{Post, UserId};

pub(crate) struct PostDao;

impl PostDao {
    /// ユーザーが購読しているサブスクリプションの投稿を人気順に取得する。
    pub async fn fetch_for_user(pool: &PgPool, user_id: UserId) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r"
            SELECT p.id, p.subscription_id, p.content, p.popularity
            FROM posts p
            JOIN users_subscriptions us ON us.subscription_id = p.subscription_id
            WHERE us.user_id = $1
            ORDER BY p.popularity DESC, p.id ASC
            ",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("failed to fetch candidate posts")?;

        rows.iter().map(row_to_post).collect()
    }
}

pub(crate) fn row_to_post(row: &PgRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id").context("failed to get post id")?,
        subscription_id: row
            .try_get("subscription_id")
            .context("failed to get post subscription_id")?,
        content: row.try_get("content").context("failed to get post content")?,
        popularity: row
            .try_get("popularity")
            .context("failed to get post popularity")?,
    })
}
