use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type SubscriptionId = i64;
pub type PostId = i64;
pub type DigestId = i64;

/// A candidate post as fetched from the store. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub subscription_id: SubscriptionId,
    pub content: String,
    pub popularity: i32,
}

impl Post {
    pub fn new(
        id: PostId,
        subscription_id: SubscriptionId,
        content: impl Into<String>,
        popularity: i32,
    ) -> Self {
        Self {
            id,
            subscription_id,
            content: content.into(),
            popularity,
        }
    }
}

/// A composed digest.
///
/// Persisted digests carry the identifier assigned by the store. Digests that
/// were never written (nothing was selected) carry [`Digest::SENTINEL_ID`]
/// and no posts; downstream consumers treat both the same way and can tell
/// them apart with [`Digest::is_persisted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub id: DigestId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub posts: Vec<Post>,
}

impl Digest {
    pub const SENTINEL_ID: DigestId = 0;

    /// Placeholder published when no post was selected for the user.
    #[must_use]
    pub fn synthetic(user_id: UserId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Self::SENTINEL_ID,
            user_id,
            timestamp,
            posts: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id != Self::SENTINEL_ID
    }

    #[must_use]
    pub fn post_ids(&self) -> Vec<PostId> {
        self.posts.iter().map(|post| post.id).collect()
    }

    /// Serialized snapshot published to the result cache.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_snapshot(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// # Errors
    /// Returns an error if `raw` is not a valid digest snapshot.
    pub fn from_snapshot(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
