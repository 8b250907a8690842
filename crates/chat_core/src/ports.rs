//! crates/chat_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the external collaborators of
//! the core: the user record store, the chat model, the image model, image
//! file storage, the credential ledger and outbound notifications.
//! Concrete implementations live in the `api` service.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., files, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// User Record Store
//=========================================================================================

/// The whole stored mapping of account identifier to raw user document.
///
/// Documents are kept raw so records written under older schemas can be
/// migrated after loading.
pub type StoredUsers = BTreeMap<String, serde_json::Value>;

/// Whole-document persistence. There is no partial update: every `save`
/// replaces the entire mapping.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn load(&self) -> PortResult<StoredUsers>;
    async fn save(&self, users: &StoredUsers) -> PortResult<()>;
}

//=========================================================================================
// Chat Model
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Incremental text fragments from a streaming completion. The stream ending
/// is the completion signal.
pub type TextStream = Pin<Box<dyn Stream<Item = PortResult<String>> + Send>>;

#[async_trait]
pub trait ChatModelService: Send + Sync {
    /// Requests a single, complete reply.
    async fn complete(&self, messages: &[ChatMessage]) -> PortResult<String>;

    /// Requests a reply delivered as incremental fragments.
    async fn complete_streaming(&self, messages: &[ChatMessage]) -> PortResult<TextStream>;
}

//=========================================================================================
// Image Model and Image Files
//=========================================================================================

/// Requested output dimensions, e.g. `1024x1024`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const SQUARE: ImageSize = ImageSize {
        width: 1024,
        height: 1024,
    };
    pub const LANDSCAPE: ImageSize = ImageSize {
        width: 1792,
        height: 1024,
    };
    pub const PORTRAIT: ImageSize = ImageSize {
        width: 1024,
        height: 1792,
    };
    pub const SUPPORTED: [ImageSize; 3] = [Self::SQUARE, Self::LANDSCAPE, Self::PORTRAIT];
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::SQUARE
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for ImageSize {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::CoreError::InvalidArgument(format!("unsupported image size '{}'", s));
        let (w, h) = s.trim().split_once('x').ok_or_else(invalid)?;
        let size = ImageSize {
            width: w.trim().parse().map_err(|_| invalid())?,
            height: h.trim().parse().map_err(|_| invalid())?,
        };
        if Self::SUPPORTED.contains(&size) {
            Ok(size)
        } else {
            Err(invalid())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Standard,
    Hd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub quality: ImageQuality,
}

/// Decoded image bytes returned by the image service.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    /// File extension matching the encoding, without the dot.
    pub extension: String,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> PortResult<GeneratedImage>;
}

#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Persists image bytes under the given file name.
    async fn store_image(&self, filename: &str, bytes: &[u8]) -> PortResult<()>;
}

//=========================================================================================
// Credentials and Notifications
//=========================================================================================

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored secret for an account, or `None` when unknown.
    async fn find_secret(&self, account: &str) -> PortResult<Option<String>>;

    async fn register(&self, account: &str, secret: &str) -> PortResult<()>;
}

/// Result of a notification attempt, with a diagnostic for logs and callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOutcome {
    pub delivered: bool,
    pub detail: String,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Sends a plain-text message to an address.
    async fn send(&self, to: &str, subject: &str, body: &str) -> NotificationOutcome;
}
