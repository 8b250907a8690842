pub mod chat;
pub mod directory;
pub mod domain;
pub mod error;
pub mod history;
pub mod images;
pub mod migration;
pub mod persona;
pub mod ports;
pub mod quota;
pub mod sessions;
pub mod timestamp;

pub use chat::{ChatEvent, ChatOrchestrator, ReplyStream, RetryPolicy};
pub use directory::UserDirectory;
pub use domain::{ImageAttachment, ImageInfo, ImageUsage, Sender, Session, SessionId, Tier, Turn, UpgradeEntry, UserRecord};
pub use error::{CoreError, CoreResult};
pub use images::{GeneratedTurn, ImageStudio};
pub use ports::{
    ChatModelService, CredentialStore, ImageGenerationService, ImageStorage, NotificationService, PortError,
    PortResult, UserStore,
};
pub use quota::{QuotaStatus, TierPlan, TIER_PLANS};
pub use sessions::SessionSummary;
