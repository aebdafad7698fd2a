use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Credentials issued by WSAA for one service: the `token` and `sign` pair
/// every authenticated call carries, plus the server-declared expiration.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationTicket {
    token: String,
    sign: String,
    expiration: String,
}

impl AuthorizationTicket {
    pub fn new(
        token: impl Into<String>,
        sign: impl Into<String>,
        expiration: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            sign: sign.into(),
            expiration: expiration.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn sign(&self) -> &str {
        &self.sign
    }

    /// Expiration exactly as the server sent it.
    pub fn expiration(&self) -> &str {
        &self.expiration
    }

    /// Expiration parsed as an RFC 3339 timestamp, if it is one.
    pub fn expires_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(self.expiration.trim()).ok()
    }
}

// token and sign are bearer credentials
impl std::fmt::Debug for AuthorizationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationTicket")
            .field("token", &"<redacted>")
            .field("sign", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}
