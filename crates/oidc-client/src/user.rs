//! User profile
//!
//! Claims come from two places: the payload of the `id_token` (decoded, not
//! verified) and the userinfo endpoint. A successful userinfo fetch takes
//! precedence until the next logout.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::OAuthClient;
use crate::grants;
use crate::types::UserInfo;

/// Decode the payload segment of a JWT into claims.
///
/// The signature is not checked. Accepts padded and unpadded segments in
/// either base64 alphabet.
pub fn decode_jwt_claims(jwt: &str) -> Option<UserInfo> {
    let payload = jwt.split('.').nth(1)?;
    let normalized = payload
        .trim_end_matches('=')
        .replace('+', "-")
        .replace('/', "_");
    let bytes = match URL_SAFE_NO_PAD.decode(normalized) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "id_token payload is not base64");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(claims) => Some(claims),
        Err(e) => {
            warn!(error = %e, "id_token payload is not a claims object");
            None
        }
    }
}

impl OAuthClient {
    /// Current user: the last userinfo response, else the `id_token` claims.
    pub fn user(&self) -> Option<UserInfo> {
        if let Some(user) = self.user.borrow().clone() {
            return Some(user);
        }
        self.token
            .read()
            .id_token
            .as_deref()
            .and_then(decode_jwt_claims)
    }

    pub fn subscribe_user(&self) -> watch::Receiver<Option<UserInfo>> {
        self.user.subscribe()
    }

    /// Fetch the userinfo endpoint through the authorized client.
    ///
    /// Only runs while the token is authorized and a userinfo endpoint is
    /// configured. A successful response replaces the current user.
    pub async fn load_user_info(&self) -> Option<UserInfo> {
        if !self.is_authorized() {
            debug!("not authorized, skipping userinfo");
            return None;
        }
        let config = self.config.config().await;
        let user = grants::user_info(&self.authorized, &config).await?;
        self.user.send_replace(Some(user.clone()));
        Some(user)
    }

    pub(crate) fn clear_user(&self) {
        self.user.send_replace(None);
    }
}
