use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::digest::{Post, PostId, SubscriptionId};

/// Picks which candidate posts make it into a digest.
///
/// Implementations are pure: the same candidates and limit always produce the
/// same ordered ids, and the result never contains a post that was not among
/// the candidates.
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, posts: &[Post], limit: usize) -> Vec<PostId>;
}

/// Most popular posts first, regardless of subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopPopularity;

/// Covers as many subscriptions as the limit allows, then fills the remaining
/// slots by popularity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionCoverage;

/// Candidates by descending popularity. The sort is stable, so equal scores
/// keep their input order.
fn rank_by_popularity(posts: &[Post]) -> Vec<&Post> {
    let mut ranked: Vec<&Post> = posts.iter().collect();
    ranked.sort_by_key(|post| Reverse(post.popularity));
    ranked
}

impl SelectionStrategy for TopPopularity {
    fn name(&self) -> &'static str {
        "top_popularity"
    }

    fn select(&self, posts: &[Post], limit: usize) -> Vec<PostId> {
        rank_by_popularity(posts)
            .into_iter()
            .take(limit)
            .map(|post| post.id)
            .collect()
    }
}

impl SelectionStrategy for SubscriptionCoverage {
    fn name(&self) -> &'static str {
        "subscription_coverage"
    }

    fn select(&self, posts: &[Post], limit: usize) -> Vec<PostId> {
        let ranked = rank_by_popularity(posts);
        let mut selected = Vec::with_capacity(limit.min(ranked.len()));
        let mut taken = vec![false; ranked.len()];
        let mut covered: HashSet<SubscriptionId> = HashSet::new();

        // First pass: the best post of each subscription not yet covered.
        for (index, post) in ranked.iter().enumerate() {
            if selected.len() >= limit {
                break;
            }
            if covered.insert(post.subscription_id) {
                selected.push(post.id);
                taken[index] = true;
            }
        }

        // Second pass: fill what is left by popularity.
        for (index, post) in ranked.iter().enumerate() {
            if selected.len() >= limit {
                break;
            }
            if !taken[index] {
                selected.push(post.id);
            }
        }

        selected
    }
}

/// Strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    TopPopularity,
    #[default]
    SubscriptionCoverage,
}

impl StrategyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::TopPopularity => "top_popularity",
            StrategyKind::SubscriptionCoverage => "subscription_coverage",
        }
    }

    #[must_use]
    pub fn build(self) -> Arc<dyn SelectionStrategy> {
        match self {
            StrategyKind::TopPopularity => Arc::new(TopPopularity),
            StrategyKind::SubscriptionCoverage => Arc::new(SubscriptionCoverage),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown selection strategy: {0}")]
pub struct UnknownStrategy(String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "top_popularity" | "top" => Ok(StrategyKind::TopPopularity),
            "subscription_coverage" | "diverse" => Ok(StrategyKind::SubscriptionCoverage),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}
