//! Wire messages
//!
//! Every message travels inside an [`Envelope`] whose body is sealed
//! under the space key, so transports only ever see ciphertext plus the
//! space id needed for routing. Operations inside `ops` and `snapshot`
//! are individually signed by their author on top of the envelope
//! encryption.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core_crypto::SealedBlob;
use crate::core_sync::SignedOperation;

/// Plaintext protocol message, sealed into an [`Envelope`] before send.
///
/// Externally tagged: the sealed body is bincode, which cannot decode
/// internally-tagged enums.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Message {
    /// Introduce ourselves to a peer we dialed
    Hello {
        peer_id: String,
        signing_key: String,
        exchange_key: String,
        head: u64,
        capabilities: Vec<String>,
    },
    /// Request membership state after redeeming an invite
    Join {
        peer_id: String,
        signing_key: String,
        exchange_key: String,
    },
    /// Announce our log head
    Head { head: u64 },
    /// Unsolicited push of operations the peer is believed to lack
    Have { ops: Vec<SignedOperation> },
    /// Request operations `from..=to`, 1-based
    Want { from: u64, to: u64 },
    /// Deliver signed operations; `from`/`to` name the log range, or
    /// zero for an ad-hoc push
    Ops {
        from: u64,
        to: u64,
        ops: Vec<SignedOperation>,
    },
    /// Acknowledge one applied operation
    Ack { op_id: Uuid },
    /// Full log for a freshly joined peer
    Snapshot {
        head: u64,
        ops: Vec<SignedOperation>,
    },
    Ping { timestamp_ms: u64 },
    Pong { timestamp_ms: u64 },
}

impl Message {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Join { .. } => "join",
            Message::Head { .. } => "head",
            Message::Have { .. } => "have",
            Message::Want { .. } => "want",
            Message::Ops { .. } => "ops",
            Message::Ack { .. } => "ack",
            Message::Snapshot { .. } => "snapshot",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
        }
    }
}

/// What actually crosses the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub space_id: String,
    pub timestamp_ms: u64,
    pub sealed: SealedBlob,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_tags() {
        let json = serde_json::to_value(&Message::Head { head: 7 }).unwrap();
        assert_eq!(json["head"]["head"], 7);

        let json = serde_json::to_value(&Message::Want { from: 3, to: 9 }).unwrap();
        assert_eq!(json["want"]["from"], 3);
    }

    #[test]
    fn message_round_trips_through_bincode() {
        let messages = vec![
            Message::Head { head: 7 },
            Message::Want { from: 4, to: 5 },
            Message::Ack { op_id: Uuid::new_v4() },
            Message::Ping { timestamp_ms: 42 },
        ];
        for message in messages {
            let bytes = bincode::serialize(&message).unwrap();
            let decoded: Message = bincode::deserialize(&bytes).unwrap();
            assert_eq!(decoded.kind(), message.kind());
        }
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = Envelope {
            space_id: "space-1".into(),
            timestamp_ms: 42,
            sealed: SealedBlob {
                nonce: [7u8; 24],
                ciphertext: vec![1, 2, 3],
            },
        };
        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.space_id, "space-1");
        assert_eq!(decoded.sealed.ciphertext, vec![1, 2, 3]);
    }

    #[test]
    fn garbage_bytes_fail_decode() {
        assert!(Envelope::from_bytes(&[0xff; 4]).is_err());
    }
}
