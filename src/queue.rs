//! Trigger intake: a source of raw user-id payloads and the loop that drains it.

use std::num::ParseIntError;

use async_trait::async_trait;
use thiserror::Error;

use crate::digest::UserId;

pub mod rabbit;
pub mod worker;

pub use rabbit::RabbitTriggerSource;
pub use worker::TriggerLoop;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("failed to consume trigger: {0}")]
    Consume(String),

    #[error("trigger payload is not valid UTF-8")]
    NotUtf8(#[source] std::string::FromUtf8Error),

    #[error("trigger payload {payload:?} is not a user id")]
    MalformedPayload {
        payload: String,
        #[source]
        source: ParseIntError,
    },
}

/// A queue of raw trigger payloads.
///
/// Each call blocks until one payload is available. A payload returned here
/// is already acknowledged; `Ok(None)` means the source is exhausted.
#[async_trait]
pub trait TriggerSource: Send {
    async fn next_trigger(&mut self) -> Result<Option<String>, TriggerError>;
}

/// ペイロードを10進数のユーザーIDとして解釈する。前後の空白は無視する。
///
/// # Errors
/// 整数として解釈できない場合は [`TriggerError::MalformedPayload`] を返す。
pub fn parse_user_id(payload: &str) -> Result<UserId, TriggerError> {
    payload
        .trim()
        .parse::<UserId>()
        .map_err(|source| TriggerError::MalformedPayload {
            payload: payload.to_string(),
            source,
        })
}
