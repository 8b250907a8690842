//! crates/chat_core/src/migration.rs
//!
//! Upgrades stored user documents to the current schema.
//!
//! Records are loaded as raw JSON and passed through a fixed, ordered
//! pipeline of named steps before being decoded into a `UserRecord`. Each
//! step inspects the document, changes only what its schema revision
//! introduced, and is a no-op on a document it has already seen. Malformed
//! data is repaired here rather than reported as an error.

use crate::domain::{Tier, UserRecord, DEFAULT_PERSONALITY, DEFAULT_THEME};
use crate::error::{CoreError, CoreResult};
use crate::ports::PortError;
use crate::timestamp;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

/// A stored user record in raw form.
pub type Document = Map<String, Value>;

struct Step {
    name: &'static str,
    apply: fn(&mut Document, DateTime<Utc>) -> bool,
}

/// Applied in this order on every load.
const PIPELINE: &[Step] = &[
    Step {
        name: "sessions",
        apply: migrate_sessions,
    },
    Step {
        name: "tier",
        apply: migrate_tier,
    },
    Step {
        name: "repair_defaults",
        apply: repair_defaults,
    },
];

/// Runs the whole pipeline. Returns the upgraded document and whether any
/// step changed it, so read paths know to persist the result.
pub fn normalize(value: Value, now: DateTime<Utc>) -> (Document, bool) {
    let (mut document, mut changed) = match value {
        Value::Object(map) => (map, false),
        _ => (Map::new(), true),
    };
    for step in PIPELINE {
        if (step.apply)(&mut document, now) {
            debug!(step = step.name, "Applied user record migration step.");
            changed = true;
        }
    }
    (document, changed)
}

/// Migrates and decodes a stored document into a typed record.
pub fn decode(value: Value, now: DateTime<Utc>) -> CoreResult<(UserRecord, bool)> {
    let (document, changed) = normalize(value, now);
    let record = serde_json::from_value(Value::Object(document)).map_err(|e| {
        CoreError::Port(PortError::Unexpected(format!(
            "Stored user record could not be decoded: {}",
            e
        )))
    })?;
    Ok((record, changed))
}

pub fn encode(record: &UserRecord) -> CoreResult<Value> {
    serde_json::to_value(record).map_err(|e| {
        CoreError::Port(PortError::Unexpected(format!(
            "User record could not be encoded: {}",
            e
        )))
    })
}

//=========================================================================================
// Steps
//=========================================================================================

/// Wraps a legacy flat `history` into a single session named "Chat 1".
///
/// Records that already carry `sessions` are left alone, even if a stray
/// legacy `history` is still present.
pub fn migrate_sessions(document: &mut Document, now: DateTime<Utc>) -> bool {
    if document.contains_key("sessions") {
        return false;
    }
    let history = match document.remove("history") {
        Some(Value::Array(turns)) => turns,
        _ => Vec::new(),
    };
    let session_id = Uuid::new_v4().to_string();
    let mut sessions = Map::new();
    sessions.insert(
        session_id.clone(),
        json!({
            "name": "Chat 1",
            "history": history,
            "created": timestamp::format(now),
        }),
    );
    document.insert("sessions".to_string(), Value::Object(sessions));
    document.insert("active_session".to_string(), Value::String(session_id));
    true
}

/// Introduces tiers. Legacy `premium: true` maps to the premium tier and a
/// legacy `image_count` carries over into the first window.
pub fn migrate_tier(document: &mut Document, now: DateTime<Utc>) -> bool {
    if document.contains_key("tier") {
        return false;
    }
    let count = document
        .remove("image_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let premium = document
        .remove("premium")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let tier = if premium { Tier::Premium } else { Tier::Free };

    document.insert("tier".to_string(), Value::String(tier.as_str().to_string()));
    document.insert(
        "image_usage".to_string(),
        json!({
            "last_reset": timestamp::format(now),
            "count": count.min(u32::MAX as u64),
        }),
    );
    document
        .entry("upgrade_history")
        .or_insert_with(|| Value::Array(Vec::new()));
    true
}

/// Puts every field into a shape the typed record can decode.
pub fn repair_defaults(document: &mut Document, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    match document.get_mut("sessions") {
        Some(Value::Object(sessions)) => {
            let before = sessions.len();
            sessions.retain(|_, session| session.is_object());
            changed |= sessions.len() != before;
            for session in sessions.values_mut() {
                if let Value::Object(session) = session {
                    changed |= repair_session(session);
                }
            }
        }
        _ => {
            document.insert("sessions".to_string(), Value::Object(Map::new()));
            changed = true;
        }
    }

    match document.get("active_session") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => {
            document.insert("active_session".to_string(), Value::Null);
            changed = true;
        }
    }

    changed |= ensure_string(document, "theme", DEFAULT_THEME);
    changed |= ensure_string(document, "personality", DEFAULT_PERSONALITY);

    let tier_known = document
        .get("tier")
        .and_then(Value::as_str)
        .map(|t| t.parse::<Tier>().map(|tier| tier.as_str() == t).unwrap_or(false))
        .unwrap_or(false);
    if !tier_known {
        let repaired = document
            .get("tier")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<Tier>().ok())
            .unwrap_or_default();
        document.insert("tier".to_string(), Value::String(repaired.as_str().to_string()));
        changed = true;
    }

    match document.get_mut("image_usage") {
        Some(Value::Object(usage)) => {
            if !matches!(usage.get("last_reset"), Some(Value::String(_))) {
                // Left unparseable on purpose: the quota engine resets it lazily.
                usage.insert("last_reset".to_string(), Value::String(String::new()));
                changed = true;
            }
            let count_valid = usage
                .get("count")
                .and_then(Value::as_u64)
                .map(|c| c <= u32::MAX as u64)
                .unwrap_or(false);
            if !count_valid {
                usage.insert("count".to_string(), json!(0));
                changed = true;
            }
        }
        _ => {
            document.insert(
                "image_usage".to_string(),
                json!({ "last_reset": timestamp::format(now), "count": 0 }),
            );
            changed = true;
        }
    }

    if !matches!(document.get("upgrade_history"), Some(Value::Array(_))) {
        document.insert("upgrade_history".to_string(), Value::Array(Vec::new()));
        changed = true;
    }

    changed
}

fn repair_session(session: &mut Document) -> bool {
    let mut changed = false;
    if !matches!(session.get("name"), Some(Value::String(_))) {
        session.insert("name".to_string(), Value::String("Chat".to_string()));
        changed = true;
    }
    match session.get_mut("history") {
        Some(Value::Array(turns)) => {
            let before = turns.len();
            turns.retain(Value::is_object);
            changed |= turns.len() != before;
            for turn in turns.iter_mut() {
                if let Value::Object(turn) = turn {
                    changed |= repair_turn(turn);
                }
            }
        }
        _ => {
            session.insert("history".to_string(), Value::Array(Vec::new()));
            changed = true;
        }
    }
    if !matches!(session.get("created"), Some(Value::String(_))) {
        session.insert("created".to_string(), Value::String(String::new()));
        changed = true;
    }
    changed
}

/// Text fields of a turn must be strings. Null becomes empty; other values
/// keep their JSON text.
fn repair_turn(turn: &mut Document) -> bool {
    let mut changed = false;
    for key in ["sender", "content", "time"] {
        let repaired = match turn.get(key) {
            None | Some(Value::String(_)) => continue,
            Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        };
        turn.insert(key.to_string(), Value::String(repaired));
        changed = true;
    }
    changed
}

fn ensure_string(document: &mut Document, key: &str, default: &str) -> bool {
    match document.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => false,
        _ => {
            document.insert(key.to_string(), Value::String(default.to_string()));
            true
        }
    }
}
