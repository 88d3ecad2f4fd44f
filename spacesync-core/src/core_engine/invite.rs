//! Space invites
//!
//! An invite is a small sealed payload proving the sender is a member
//! of the space, carried in a `spacesync://` URI. The space key itself
//! travels out-of-band; an invite can only be validated once the key is
//! installed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core_sync::now_ms;

use super::errors::EngineError;

pub const INVITE_SCHEME_PREFIX: &str = "spacesync://join?";

/// Invites die after a day unless callers say otherwise.
pub const DEFAULT_INVITE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Sealed invite payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub space_id: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Invite {
    pub fn new(space_id: String, ttl: Duration) -> Self {
        let created_at_ms = now_ms();
        Self {
            space_id,
            created_at_ms,
            expires_at_ms: created_at_ms + ttl.as_millis() as u64,
        }
    }

    pub fn is_expired(&self) -> bool {
        now_ms() > self.expires_at_ms
    }
}

/// URI form of an invite: `spacesync://join?space=<id>&blob=<base64>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteUri {
    pub space_id: String,
    pub blob: String,
}

impl InviteUri {
    pub fn encode(&self) -> String {
        format!(
            "{INVITE_SCHEME_PREFIX}space={}&blob={}",
            self.space_id, self.blob
        )
    }

    pub fn parse(uri: &str) -> Result<Self, EngineError> {
        let query = uri
            .strip_prefix(INVITE_SCHEME_PREFIX)
            .ok_or_else(|| EngineError::InvalidInvite(format!("bad scheme: {uri}")))?;

        let mut space_id = None;
        let mut blob = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("space", value)) => space_id = Some(value.to_string()),
                Some(("blob", value)) => blob = Some(value.to_string()),
                _ => {}
            }
        }

        match (space_id, blob) {
            (Some(space_id), Some(blob)) if !space_id.is_empty() && !blob.is_empty() => {
                Ok(Self { space_id, blob })
            }
            _ => Err(EngineError::InvalidInvite(
                "missing space or blob parameter".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_round_trips() {
        let uri = InviteUri {
            space_id: "team-apis".into(),
            blob: "AAECow==".into(),
        };
        let encoded = uri.encode();
        assert!(encoded.starts_with("spacesync://join?"));
        assert_eq!(InviteUri::parse(&encoded).unwrap(), uri);
    }

    #[test]
    fn rejects_foreign_schemes_and_partial_uris() {
        assert!(InviteUri::parse("https://join?space=a&blob=b").is_err());
        assert!(InviteUri::parse("spacesync://join?space=a").is_err());
        assert!(InviteUri::parse("spacesync://join?blob=b").is_err());
        assert!(InviteUri::parse("spacesync://join?space=&blob=b").is_err());
    }

    #[test]
    fn fresh_invite_is_not_expired() {
        let invite = Invite::new("s".into(), DEFAULT_INVITE_TTL);
        assert!(!invite.is_expired());
        assert_eq!(
            invite.expires_at_ms - invite.created_at_ms,
            DEFAULT_INVITE_TTL.as_millis() as u64
        );
    }

    #[test]
    fn zero_ttl_invite_expires() {
        let invite = Invite::new("s".into(), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(invite.is_expired());
    }
}
