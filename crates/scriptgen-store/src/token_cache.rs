//! Cached OAuth access token for the Firestore REST API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Assumed lifetime when the provider reports an unusable expiry.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct Cached {
    value: String,
    expires_at: Instant,
}

/// Access token cache.
///
/// A single mutex serializes refreshes so concurrent requests that find the
/// token stale trigger one provider call, not one each.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    slot: Mutex<Option<Cached>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            slot: Mutex::new(None),
        }
    }

    /// Drop the cached token, e.g. after the API reported it expired.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn get(&self) -> StoreResult<String> {
        let mut slot = self.slot.lock().await;
        let now = Instant::now();

        if let Some(cached) = slot.as_ref() {
            if now + REFRESH_MARGIN < cached.expires_at {
                return Ok(cached.value.clone());
            }
        }

        match self.provider.token(&[DATASTORE_SCOPE]).await {
            Ok(token) => {
                let delta = token.expires_at() - Utc::now();
                let remaining = if delta <= chrono::Duration::zero() {
                    Duration::ZERO
                } else {
                    delta.to_std().unwrap_or(FALLBACK_TTL)
                };
                let value = token.as_str().to_string();
                *slot = Some(Cached {
                    value: value.clone(),
                    expires_at: now + remaining,
                });
                debug!(ttl_secs = remaining.as_secs(), "Refreshed Firestore access token");
                Ok(value)
            }
            // A stale-but-unexpired token still beats failing the request
            Err(e) => match slot.as_ref() {
                Some(cached) if now < cached.expires_at => {
                    warn!("Token refresh failed, reusing current token: {}", e);
                    Ok(cached.value.clone())
                }
                _ => Err(StoreError::auth_error(format!(
                    "Failed to obtain access token: {}",
                    e
                ))),
            },
        }
    }
}
