//! Top-level encode/decode entry point (spec §4.1).
//!
//! Decoding never yields a partially constructed message: `serde_bencode`
//! either produces a complete `Message` or an error, so malformed input is
//! rejected wholesale rather than patched together from a partial dict.

use crate::errors::{Error, ErrorKind, Result};
use crate::id::NodeId;
use crate::messages::{Message, MessageType, Method, RawEnvelope, TransactionId};

#[derive(Default, Clone, Copy)]
pub struct Codec;

impl Codec {
    pub fn new() -> Codec {
        Codec
    }

    /// Decodes a full message. Use this whenever the method context isn't
    /// needed (queries and errors are always self-describing) or is already
    /// known and the caller is happy to let serde's untagged `Response`
    /// resolution pick the right shape for itself — which works for `ping`
    /// and `announce_peer` (both `OnlyId`) but is ambiguous between
    /// `find_node`'s `NextHop` and a peerless `get_peers`'s `NextHop`, and
    /// can misfire between `GetPeers` and `NextHop` shapes. Prefer
    /// `decode_raw` + `promote_response` for responses when the method
    /// matters.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        Message::decode(bytes)
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        message.encode()
    }

    /// Decodes only the method-agnostic envelope fields common to every
    /// response: `{t, id}`. Used when the dispatcher hasn't yet looked up
    /// the originating query's method.
    pub fn decode_raw_response(&self, bytes: &[u8]) -> Result<RawEnvelope> {
        #[derive(serde_derive::Deserialize)]
        #[allow(dead_code)]
        struct Bare {
            #[serde(rename = "t", with = "serde_bytes")]
            t: TransactionId,
            #[serde(rename = "y")]
            y: String,
            r: Option<BareResult>,
            e: Option<crate::messages::KRPCError>,
        }

        #[derive(serde_derive::Deserialize)]
        struct BareResult {
            id: NodeId,
        }

        let bare: Bare = serde_bencode::de::from_bytes(bytes)
            .map_err(|cause| ErrorKind::DecodeError { cause })?;

        if bare.y != "r" {
            return Err(ErrorKind::NotAResponse { y: bare.y }.into());
        }

        let id = bare
            .r
            .map(|r| r.id)
            .ok_or(ErrorKind::MissingNodeId)?;

        Ok(RawEnvelope {
            transaction_id: bare.t,
            id,
        })
    }

    /// Promotes a raw response into a fully typed `Message` once the
    /// dispatcher knows which method originated the transaction (spec
    /// §4.1, §4.7). Re-decodes the bytes with that context in hand.
    pub fn promote_response(&self, bytes: &[u8], method: Method) -> Result<Message> {
        let message = Message::decode(bytes)?;
        match (&message.message_type, method) {
            (MessageType::Response { response }, method) => {
                use crate::messages::Response;
                let matches = match (response, method) {
                    (Response::OnlyId { .. }, Method::Ping)
                    | (Response::OnlyId { .. }, Method::AnnouncePeer) => true,
                    (Response::NextHop { .. }, Method::FindNode) => true,
                    (Response::NextHop { .. }, Method::GetPeers) => true,
                    (Response::GetPeers { .. }, Method::GetPeers) => true,
                    (Response::NextHop { .. }, Method::SampleInfoHashes) => true,
                    _ => false,
                };
                if matches {
                    Ok(message)
                } else {
                    Err(ErrorKind::ResponseShapeMismatch { method }.into())
                }
            }
            (MessageType::Error { .. }, _) => Ok(message),
            _ => Err(Error::from(ErrorKind::ResponseShapeMismatch { method })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use crate::messages::{Message, Query};

    #[test]
    fn ping_query_round_trips() {
        let codec = Codec::new();
        let msg = Message::new_query(vec![b'a', b'a'], Query::Ping { id: NodeId::random() });
        let bytes = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn malformed_bencode_is_rejected() {
        let codec = Codec::new();
        assert!(codec.decode(b"not bencode").is_err());
    }

    #[test]
    fn promote_response_rejects_mismatched_method() {
        let codec = Codec::new();
        let msg = Message::new_response(
            vec![b'a', b'a'],
            crate::messages::Response::OnlyId { id: NodeId::random() },
        );
        let bytes = codec.encode(&msg).unwrap();
        assert!(codec.promote_response(&bytes, Method::FindNode).is_err());
        assert!(codec.promote_response(&bytes, Method::Ping).is_ok());
    }
}
