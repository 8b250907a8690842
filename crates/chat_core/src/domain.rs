//! crates/chat_core/src/domain.rs
//!
//! Defines the core data structures persisted for every user account.
//! The serde shape of these structs is the stored document shape; older
//! shapes are upgraded by `migration` before they are decoded into them.

use crate::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Opaque identifier of a chat session within one user record.
pub type SessionId = String;

pub const DEFAULT_THEME: &str = "dark";
pub const DEFAULT_PERSONALITY: &str = "default";

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}

fn default_personality() -> String {
    DEFAULT_PERSONALITY.to_string()
}

//=========================================================================================
// User Record
//=========================================================================================

/// Everything stored for one account, keyed by its normalized email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub sessions: BTreeMap<SessionId, Session>,
    #[serde(default)]
    pub active_session: Option<SessionId>,
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Key into the personality presets. Not validated on write.
    #[serde(default = "default_personality")]
    pub personality: String,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub image_usage: ImageUsage,
    /// Append-only audit log of tier changes.
    #[serde(default)]
    pub upgrade_history: Vec<UpgradeEntry>,
    /// Fields this schema does not know about, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    /// A fresh record with a single empty session, as created on first login.
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut record = Self {
            sessions: BTreeMap::new(),
            active_session: None,
            theme: default_theme(),
            personality: default_personality(),
            tier: Tier::Free,
            image_usage: ImageUsage::fresh(now),
            upgrade_history: Vec::new(),
            extra: Map::new(),
        };
        record.ensure_active(now);
        record
    }

    pub fn set_theme(&mut self, theme: &str) -> crate::CoreResult<()> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(crate::CoreError::InvalidArgument(
                "theme must not be empty".to_string(),
            ));
        }
        self.theme = theme.to_string();
        Ok(())
    }

    /// Stores the personality key as given; unknown keys fall back at prompt time.
    pub fn set_personality(&mut self, personality: &str) {
        let personality = personality.trim();
        self.personality = if personality.is_empty() {
            default_personality()
        } else {
            personality.to_string()
        };
    }
}

//=========================================================================================
// Sessions and Turns
//=========================================================================================

/// A named, independent chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    /// Set once at creation.
    #[serde(default)]
    pub created: String,
}

impl Session {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            history: Vec::new(),
            created: timestamp::format(now),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    // Anything that is not the user was said by the assistant.
    #[default]
    #[serde(other)]
    Bot,
}

/// One message within a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredTurn", into = "StoredTurn")]
pub struct Turn {
    pub sender: Sender,
    pub content: String,
    /// Display timestamp, stored verbatim.
    pub time: String,
    pub image: Option<ImageAttachment>,
    /// Stored keys not modelled above, including the fields of an image
    /// attachment too incomplete to read.
    pub extra: Map<String, Value>,
}

/// The flat stored shape of a turn. Attachment fields sit beside the text
/// fields.
#[derive(Serialize, Deserialize)]
struct StoredTurn {
    #[serde(default)]
    sender: Sender,
    #[serde(default)]
    content: String,
    #[serde(default)]
    time: String,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

const ATTACHMENT_KEYS: [&str; 5] = ["type", "image_id", "filename", "prompt", "image_info"];

impl From<StoredTurn> for Turn {
    fn from(stored: StoredTurn) -> Self {
        let StoredTurn {
            sender,
            content,
            time,
            mut rest,
        } = stored;
        let image = if rest.get("type").and_then(Value::as_str) == Some("image") || rest.contains_key("image_id") {
            match serde_json::from_value::<ImageAttachment>(Value::Object(rest.clone())) {
                Ok(attachment) => {
                    for key in ATTACHMENT_KEYS {
                        rest.remove(key);
                    }
                    Some(attachment)
                }
                Err(e) => {
                    warn!(error = %e, "Stored image turn is incomplete; keeping its fields unread.");
                    None
                }
            }
        } else {
            None
        };
        Self {
            sender,
            content,
            time,
            image,
            extra: rest,
        }
    }
}

impl From<Turn> for StoredTurn {
    fn from(turn: Turn) -> Self {
        let mut rest = turn.extra;
        if let Some(attachment) = turn.image {
            if let Ok(Value::Object(fields)) = serde_json::to_value(attachment) {
                rest.extend(fields);
            }
        }
        Self {
            sender: turn.sender,
            content: turn.content,
            time: turn.time,
            rest,
        }
    }
}

impl Turn {
    pub fn user(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::text(Sender::User, content, now)
    }

    pub fn bot(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::text(Sender::Bot, content, now)
    }

    fn text(sender: Sender, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            sender,
            content: content.into(),
            time: timestamp::format(now),
            image: None,
            extra: Map::new(),
        }
    }

    /// A bot turn carrying a generated image. The content is a placeholder
    /// token the client swaps for the image itself.
    pub fn image(attachment: ImageAttachment, now: DateTime<Utc>) -> Self {
        Self {
            sender: Sender::Bot,
            content: image_placeholder(&attachment.image_id),
            time: timestamp::format(now),
            image: Some(attachment),
            extra: Map::new(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.image.is_some()
    }
}

pub fn image_placeholder(image_id: &str) -> String {
    format!("[IMAGE:{}]", image_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub image_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub image_info: ImageInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub size_kb: f64,
    /// Embedded preview data, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

//=========================================================================================
// Tiers and Image Usage
//=========================================================================================

/// Subscription level. The per-window image quota is looked up from the
/// static plan table in `quota`, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Unlimited,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Premium, Tier::Unlimited];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Unlimited => "unlimited",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Tier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| crate::CoreError::InvalidArgument(format!("unknown tier '{}'", wanted)))
    }
}

/// Image generation counter for the current rolling window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUsage {
    /// Start of the current window. May be unparseable on old records;
    /// the quota engine repairs it on the next increment.
    #[serde(default)]
    pub last_reset: String,
    #[serde(default)]
    pub count: u32,
}

impl ImageUsage {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            last_reset: timestamp::format(now),
            count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeEntry {
    pub from_tier: Tier,
    pub to_tier: Tier,
    pub timestamp: String,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_turn_has_no_type_field() {
        let now = Utc::now();
        let value = serde_json::to_value(Turn::user("hi", now)).unwrap();
        assert_eq!(value["sender"], "user");
        assert!(value.get("type").is_none());
        assert!(value.get("image_id").is_none());
    }

    #[test]
    fn test_image_turn_reads_flat_stored_shape() {
        let stored = json!({
            "sender": "bot",
            "type": "image",
            "content": "[IMAGE:abc]",
            "image_id": "abc",
            "filename": "abc.png",
            "prompt": "a red fox",
            "time": "2025-01-01 10:00:00",
            "image_info": {"width": 1024, "height": 1024, "size_kb": 812.4}
        });
        let turn: Turn = serde_json::from_value(stored.clone()).unwrap();
        let image = turn.image.as_ref().unwrap();
        assert_eq!(image.image_id, "abc");
        assert_eq!(image.image_info.width, 1024);
        assert_eq!(image.image_info.thumbnail, None);
        assert_eq!(serde_json::to_value(&turn).unwrap(), stored);
    }

    #[test]
    fn test_incomplete_image_turn_keeps_its_fields() {
        let stored = json!({
            "sender": "bot",
            "type": "image",
            "content": "[IMAGE:]",
            "filename": "lost.png",
            "prompt": "a red fox",
            "time": "2025-01-01 10:00:00",
            "mood": "sunny"
        });
        let turn: Turn = serde_json::from_value(stored.clone()).unwrap();
        assert!(!turn.is_image());
        assert_eq!(turn.extra.get("filename"), Some(&json!("lost.png")));
        assert_eq!(turn.extra.get("mood"), Some(&json!("sunny")));
        assert_eq!(serde_json::to_value(&turn).unwrap(), stored);
    }

    #[test]
    fn test_unknown_turn_fields_survive_next_to_an_image() {
        let mut stored = json!({
            "sender": "bot",
            "type": "image",
            "content": "[IMAGE:abc]",
            "image_id": "abc",
            "filename": "abc.png",
            "prompt": "a red fox",
            "time": "2025-01-01 10:00:00",
            "image_info": {"width": 1024, "height": 1024, "size_kb": 812.4}
        });
        stored["liked"] = json!(true);
        let turn: Turn = serde_json::from_value(stored.clone()).unwrap();
        assert!(turn.is_image());
        assert_eq!(turn.extra.len(), 1);
        assert_eq!(serde_json::to_value(&turn).unwrap(), stored);
    }

    #[test]
    fn test_unknown_sender_is_treated_as_bot() {
        let turn: Turn = serde_json::from_value(json!({"sender": "assistant", "content": "x"})).unwrap();
        assert_eq!(turn.sender, Sender::Bot);
    }

    #[test]
    fn test_unknown_fields_survive_a_round_trip() {
        let now = Utc::now();
        let mut value = serde_json::to_value(UserRecord::new(now)).unwrap();
        value["password"] = json!("legacy");
        let record: UserRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.extra.get("password"), Some(&json!("legacy")));
        assert_eq!(serde_json::to_value(&record).unwrap()["password"], "legacy");
    }

    #[test]
    fn test_tier_parses_case_insensitively() {
        assert_eq!("Premium".parse::<Tier>().unwrap(), Tier::Premium);
        assert!(matches!(
            "platinum".parse::<Tier>(),
            Err(crate::CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_blank_personality_resets_to_default() {
        let mut record = UserRecord::new(Utc::now());
        record.set_personality("pirate");
        assert_eq!(record.personality, "pirate");
        record.set_personality("   ");
        assert_eq!(record.personality, DEFAULT_PERSONALITY);
    }
}
