//! Identity-provider lifecycle webhook: the single externally-triggered
//! write path. Payloads are untrusted until the signature, timestamp and
//! message id verify; only then is the event applied to storage.

use actix_web::{web, HttpRequest, HttpResponse};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::ApiError;
use crate::models::{NewUser, UserUpdate};
use crate::repo::{Repo, RepoError};
use crate::routes::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Clock skew allowed between the provider's timestamp header and our clock.
const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("missing signature headers")] MissingHeaders,
    #[error("timestamp outside tolerance")] BadTimestamp,
    #[error("signature mismatch")] BadSignature,
}

/// Verifies provider signatures over `"{id}.{timestamp}.{payload}"` with a
/// shared HMAC-SHA256 key (`whsec_`-prefixed base64 in the environment).
pub struct SignatureVerifier {
    key: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Self {
        let raw = secret.strip_prefix("whsec_").unwrap_or(secret);
        // provider secrets are base64; tolerate raw keys for local setups
        let key = B64.decode(raw).unwrap_or_else(|_| raw.as_bytes().to_vec());
        Self { key }
    }

    pub fn from_env() -> Self {
        let secret =
            std::env::var("IDENTITY_WEBHOOK_SECRET").expect("IDENTITY_WEBHOOK_SECRET not set");
        Self::new(&secret)
    }

    /// The signature header carries space-separated `v1,<base64>` candidates
    /// (key rotation); any one verifying is enough. Comparison is the MAC's
    /// own constant-time verify.
    pub fn verify(
        &self,
        msg_id: &str,
        timestamp: &str,
        signatures: &str,
        payload: &[u8],
    ) -> Result<(), WebhookError> {
        let ts: i64 = timestamp.parse().map_err(|_| WebhookError::BadTimestamp)?;
        let now = chrono::Utc::now().timestamp();
        if (now - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
            return Err(WebhookError::BadTimestamp);
        }

        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| WebhookError::BadSignature)?;
        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);

        for candidate in signatures.split_whitespace() {
            let sig = match candidate.split_once(',') {
                Some(("v1", sig)) => sig,
                _ => continue,
            };
            let Ok(decoded) = B64.decode(sig) else { continue };
            if mac.clone().verify_slice(&decoded).is_ok() {
                return Ok(());
            }
        }
        Err(WebhookError::BadSignature)
    }
}

// ---------------- event payloads ----------------

#[derive(Debug, Deserialize)]
pub struct EmailAddress {
    pub email_address: String,
}

#[derive(Debug, Deserialize)]
pub struct UserEventData {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeletedEventData {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IdentityEvent {
    #[serde(rename = "user.created")]
    UserCreated(UserEventData),
    #[serde(rename = "user.updated")]
    UserUpdated(UserEventData),
    #[serde(rename = "user.deleted")]
    UserDeleted(DeletedEventData),
    /// Event types this service does not mirror are acknowledged untouched.
    #[serde(other)]
    Ignored,
}

impl UserEventData {
    fn display_name(&self) -> Option<String> {
        if let Some(username) = &self.username {
            if !username.is_empty() {
                return Some(username.clone());
            }
        }
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let full = full.trim();
        if full.is_empty() { None } else { Some(full.to_string()) }
    }

    fn primary_email(&self) -> Result<String, ApiError> {
        self.email_addresses
            .first()
            .map(|e| e.email_address.clone())
            .ok_or_else(|| ApiError::Validation("user payload missing email address".into()))
    }
}

/// Apply a verified lifecycle event to local storage. Only reachable after
/// `SignatureVerifier::verify` succeeds.
pub async fn apply_event(repo: &dyn Repo, event: IdentityEvent) -> Result<(), ApiError> {
    match event {
        IdentityEvent::UserCreated(data) => {
            let email = data.primary_email()?;
            let name = data.display_name();
            let user = repo
                .create_user(NewUser { id: data.id, email, name, image: data.image_url })
                .await?;
            log::info!("mirrored new user {}", user.id);
            Ok(())
        }
        IdentityEvent::UserUpdated(data) => {
            let email = data.primary_email()?;
            let name = data.display_name();
            repo.update_user(&data.id, UserUpdate { email, name, image: data.image_url })
                .await?;
            Ok(())
        }
        IdentityEvent::UserDeleted(data) => {
            match repo.delete_user(&data.id).await {
                Ok(()) => {
                    log::info!("removed mirrored user {}", data.id);
                    Ok(())
                }
                Err(RepoError::NotFound) => Err(ApiError::NotFound),
                Err(e) => Err(e.into()),
            }
        }
        IdentityEvent::Ignored => Ok(()),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/webhooks/identity",
    responses(
        (status = 200, description = "Event applied"),
        (status = 400, description = "Missing or invalid signature"),
        (status = 500, description = "Storage failure")
    )
)]
pub async fn identity_webhook(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let headers = req.headers();
    let (msg_id, timestamp, signatures) = match (
        headers.get("svix-id").and_then(|v| v.to_str().ok()),
        headers.get("svix-timestamp").and_then(|v| v.to_str().ok()),
        headers.get("svix-signature").and_then(|v| v.to_str().ok()),
    ) {
        (Some(i), Some(t), Some(s)) => (i, t, s),
        _ => return Err(ApiError::Validation("missing signature headers".into())),
    };

    SignatureVerifier::from_env()
        .verify(msg_id, timestamp, signatures, &body)
        .map_err(|e| {
            log::warn!("webhook rejected: {e}");
            ApiError::Validation("webhook verification failed".into())
        })?;

    let event: IdentityEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("malformed event payload".into()))?;

    apply_event(data.repo.as_ref(), event).await?;
    Ok(HttpResponse::Ok().body("Webhook processed"))
}
