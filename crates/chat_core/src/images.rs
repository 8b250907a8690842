//! crates/chat_core/src/images.rs
//!
//! Quota-gated image generation. The quota is checked before the image
//! service is called and only consumed once an image has been produced and
//! stored. Requests still in flight hold a reservation that counts against
//! the quota, so parallel requests cannot exceed the tier limit.

use crate::directory::UserDirectory;
use crate::domain::{AttachmentKind, ImageAttachment, ImageInfo, SessionId, Turn, UserRecord};
use crate::error::{CoreError, CoreResult};
use crate::ports::{ImageGenerationService, ImageQuality, ImageRequest, ImageSize, ImageStorage};
use crate::quota::{self, QuotaStatus};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// The committed image turn and the quota left after it.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTurn {
    pub turn: Turn,
    pub quota: QuotaStatus,
}

/// Images currently being generated, per account.
type InFlight = Mutex<HashMap<String, u32>>;

/// One pending image counted against its account's quota until dropped.
struct Reservation<'a> {
    in_flight: &'a InFlight,
    account: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = in_flight.get_mut(&self.account) {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                in_flight.remove(&self.account);
            }
        }
    }
}

pub struct ImageStudio {
    directory: Arc<UserDirectory>,
    generator: Arc<dyn ImageGenerationService>,
    storage: Arc<dyn ImageStorage>,
    in_flight: InFlight,
}

impl ImageStudio {
    pub fn new(
        directory: Arc<UserDirectory>,
        generator: Arc<dyn ImageGenerationService>,
        storage: Arc<dyn ImageStorage>,
    ) -> Self {
        Self {
            directory,
            generator,
            storage,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Checks the quota with pending images counted as used and reserves
    /// one slot. Must run inside a directory transaction so the stored count
    /// and the pending count are read together.
    fn reserve(&self, account: &str, record: &UserRecord) -> CoreResult<Reservation<'_>> {
        let status = quota::ensure_allowed(record, Utc::now())?;
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = in_flight.get(account).copied().unwrap_or(0);
        if pending >= status.remaining {
            return Err(CoreError::QuotaExceeded {
                reset_seconds: status.reset_seconds,
                tier: status.tier,
                limit: status.limit,
            });
        }
        in_flight.insert(account.to_string(), pending + 1);
        Ok(Reservation {
            in_flight: &self.in_flight,
            account: account.to_string(),
        })
    }

    /// Current quota for an account without consuming anything.
    pub async fn quota(&self, account: &str) -> CoreResult<QuotaStatus> {
        let record = self.directory.view(account).await?;
        Ok(quota::can_generate(&record, Utc::now()))
    }

    pub async fn generate(
        &self,
        account: &str,
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
    ) -> CoreResult<GeneratedTurn> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(CoreError::InvalidArgument("No prompt provided".to_string()));
        }

        let account_key = UserDirectory::normalize_account(account);
        let (session_id, _reservation): (SessionId, Reservation<'_>) = self
            .directory
            .transact(account, |record| {
                let session_id = record
                    .active_session
                    .clone()
                    .ok_or_else(|| CoreError::NotFound("active session".to_string()))?;
                Ok((session_id, self.reserve(&account_key, record)?))
            })
            .await?;

        let request = ImageRequest {
            prompt: prompt.to_string(),
            size,
            quality,
        };
        let image = self.generator.generate_image(&request).await.map_err(|e| {
            warn!(error = %e, "Image generation failed.");
            CoreError::UpstreamUnavailable(e.to_string())
        })?;

        let image_id = Uuid::new_v4().simple().to_string();
        let filename = format!("{}.{}", image_id, image.extension);
        self.storage.store_image(&filename, &image.bytes).await?;

        let attachment = ImageAttachment {
            kind: AttachmentKind::Image,
            image_id: image_id.clone(),
            filename,
            prompt: prompt.to_string(),
            image_info: ImageInfo {
                width: image.width,
                height: image.height,
                size_kb: size_kb(image.bytes.len()),
                thumbnail: None,
            },
        };

        let generated = self
            .directory
            .transact(account, |record| {
                let now = Utc::now();
                quota::increment(record, now);
                let turn = Turn::image(attachment, now);
                match record.sessions.get_mut(&session_id) {
                    Some(session) => session.append(turn.clone()),
                    None => warn!(session_id = %session_id, "Session was deleted before the image arrived; not adding it to history."),
                }
                Ok(GeneratedTurn {
                    turn,
                    quota: quota::can_generate(record, now),
                })
            })
            .await?;

        info!(
            image_id = %image_id,
            remaining = generated.quota.remaining,
            "Generated image."
        );
        Ok(generated)
    }
}

fn size_kb(bytes: usize) -> f64 {
    (bytes as f64 / 1024.0 * 10.0).round() / 10.0
}
