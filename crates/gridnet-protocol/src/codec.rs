//! Tokio codec for Gridnet wire messages.
//!
//! Messages are JSON objects delimited by a newline. The same codec serves
//! both the signaling namespace and the DHT namespace; the message family
//! is selected by the type parameter.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use gridnet_core::{GridError, Result};

/// Maximum size of a single encoded message (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Line-delimited JSON codec
#[derive(Debug)]
pub struct JsonCodec<M> {
    /// Statistics: messages encoded
    pub messages_encoded: u64,
    /// Statistics: messages decoded
    pub messages_decoded: u64,
    /// Statistics: bytes written
    pub bytes_written: u64,
    /// Statistics: bytes read
    pub bytes_read: u64,
    /// Resume point for the newline scan across partial reads
    scan_offset: usize,
    _marker: PhantomData<M>,
}

impl<M> JsonCodec<M> {
    pub fn new() -> Self {
        Self {
            messages_encoded: 0,
            messages_decoded: 0,
            bytes_written: 0,
            bytes_read: 0,
            scan_offset: 0,
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: DeserializeOwned> Decoder for JsonCodec<M> {
    type Item = M;
    type Error = GridError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let newline = src[self.scan_offset..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|pos| pos + self.scan_offset);

            let Some(idx) = newline else {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(GridError::MessageTooLarge {
                        size: src.len(),
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                // Need more data; skip re-scanning what we already saw
                self.scan_offset = src.len();
                return Ok(None);
            };

            let line = src.split_to(idx + 1);
            self.scan_offset = 0;

            let payload = &line[..line.len() - 1];
            if payload.iter().all(|b| b.is_ascii_whitespace()) {
                continue; // keep-alive blank line
            }

            self.messages_decoded += 1;
            self.bytes_read += payload.len() as u64;
            trace!(bytes = payload.len(), "Decoded message line");

            return match serde_json::from_slice(payload) {
                Ok(msg) => Ok(Some(msg)),
                Err(e) => {
                    warn!(error = %e, "Message decode error");
                    Err(GridError::MalformedMessage(e.to_string()))
                }
            };
        }
    }
}

impl<M: Serialize> Encoder<M> for JsonCodec<M> {
    type Error = GridError;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<()> {
        let payload =
            serde_json::to_vec(&item).map_err(|e| GridError::Serialization(e.to_string()))?;

        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(GridError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        dst.reserve(payload.len() + 1);
        dst.put_slice(&payload);
        dst.put_u8(b'\n');

        self.messages_encoded += 1;
        self.bytes_written += payload.len() as u64;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht_messages::DhtMessage;
    use crate::messages::Message;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::new();

        codec.encode(Message::ping(), &mut buf).unwrap();
        assert_eq!(codec.messages_encoded, 1);
        assert_eq!(buf[buf.len() - 1], b'\n');

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(codec.messages_decoded, 1);
        assert_eq!(decoded.type_name(), "ping");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_multiple_messages() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::new();

        codec.encode(Message::ping(), &mut buf).unwrap();
        codec.encode(Message::error("nope"), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(first.type_name(), "ping");
        assert_eq!(second.type_name(), "error");
    }

    #[test]
    fn test_codec_partial_data() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::new();

        codec.encode(Message::ping(), &mut buf).unwrap();

        // Hold back the trailing newline
        let full = buf.split();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);

        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Deliver the rest
        partial.put_u8(b'\n');
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_codec_blank_lines_skipped() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::from(&b"\n\n"[..]);
        codec.encode(Message::pong(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.type_name(), "pong");
    }

    #[test]
    fn test_codec_malformed_line() {
        let mut codec = JsonCodec::<Message>::new();
        let mut buf = BytesMut::from(&b"{not json}\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_dht_namespace_shares_codec() {
        let mut codec = JsonCodec::<DhtMessage>::new();
        let mut buf = BytesMut::new();

        codec
            .encode(DhtMessage::find_node(3, "node-5"), &mut buf)
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.request_id(), Some(3));
    }
}
