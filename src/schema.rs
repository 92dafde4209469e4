//! JSON Schema for the digest snapshot published to the result cache.
//!
//! Readers of the cache depend on this shape; tests validate every published
//! snapshot against it.

use std::sync::LazyLock;

use serde_json::{Value, json};

pub static DIGEST_SNAPSHOT_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "Digest Snapshot",
        "description": "Digest published under the user id key",
        "type": "object",
        "properties": {
            "id": {
                "type": "integer",
                "minimum": 0,
                "description": "Store-assigned digest id, 0 when the digest was not persisted"
            },
            "user_id": { "type": "integer" },
            "timestamp": {
                "type": "string",
                "format": "date-time"
            },
            "posts": {
                "type": "array",
                "items": { "$ref": "#/$defs/post" }
            }
        },
        "required": ["id", "user_id", "timestamp", "posts"],
        "additionalProperties": false,
        "$defs": {
            "post": {
                "type": "object",
                "properties": {
                    "id": { "type": "integer" },
                    "subscription_id": { "type": "integer" },
                    "content": { "type": "string" },
                    "popularity": { "type": "integer" }
                },
                "required": ["id", "subscription_id", "content", "popularity"],
                "additionalProperties": false
            }
        }
    })
});

/// スキーマ検証結果。
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// JSON Schemaでデータを検証する。
#[must_use]
pub fn validate_json(schema_json: &Value, instance: &Value) -> ValidationResult {
    match jsonschema::validator_for(schema_json) {
        Ok(validator) => {
            let errors: Vec<String> = validator
                .iter_errors(instance)
                .map(|error| format!("{}: {error}", error.instance_path))
                .collect();
            if errors.is_empty() {
                ValidationResult::valid()
            } else {
                ValidationResult::invalid(errors)
            }
        }
        Err(e) => ValidationResult::invalid(vec![format!("Schema compilation error: {e}")]),
    }
}

/// Validates a raw snapshot string as published to the cache.
#[must_use]
pub fn validate_snapshot(raw: &str) -> ValidationResult {
    match serde_json::from_str::<Value>(raw) {
        Ok(instance) => validate_json(&DIGEST_SNAPSHOT_SCHEMA, &instance),
        Err(e) => ValidationResult::invalid(vec![format!("snapshot is not JSON: {e}")]),
    }
}
