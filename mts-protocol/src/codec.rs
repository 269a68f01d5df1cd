//! Encoder and decoder for MTS frames and envelopes.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Envelope;
use bytes::{Bytes, BytesMut};

/// Encodes envelopes into length-prefixed frames.
pub struct Encoder;

impl Encoder {
    /// Encodes an envelope into a frame.
    pub fn encode_envelope(envelope: &Envelope) -> Result<BytesMut, ProtocolError> {
        Self::encode_json(envelope)
    }

    /// Encodes any JSON-serializable value into a frame.
    pub fn encode_json<T: serde::Serialize>(value: &T) -> Result<BytesMut, ProtocolError> {
        let frame = Frame::from_json(value)?;
        frame.encode()
    }
}

/// Accumulates inbound bytes and slices out complete frames.
///
/// The read chunk size is independent of framing: bytes may be fed in any
/// split and frames come out once fully buffered.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next envelope from the buffer.
    pub fn decode_envelope(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame.payload)?)),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Route;
    use proptest::prelude::*;

    fn envelope(rpc_id: i32, data: Vec<u8>) -> Envelope {
        Envelope::request(Route::RmsPing, 1, 2, rpc_id, data)
    }

    fn drain(decoder: &mut Decoder) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(env) = decoder.decode_envelope().unwrap() {
            out.push(env);
        }
        out
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = envelope(3, b"hello".to_vec()).with_jwt("T1");
        let encoded = Encoder::encode_envelope(&env).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);
        let decoded = decoder.decode_envelope().unwrap().unwrap();

        assert_eq!(decoded, env);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_split_across_reads() {
        let encoded = Encoder::encode_envelope(&envelope(1, vec![1, 2, 3])).unwrap();
        let (a, b) = encoded.split_at(7);

        let mut decoder = Decoder::new();
        decoder.extend(a);
        assert!(decoder.decode_envelope().unwrap().is_none());
        assert_eq!(decoder.buffered(), 7);

        decoder.extend_bytes(Bytes::copy_from_slice(b));
        assert_eq!(decoder.decode_envelope().unwrap().unwrap().rpc_id, 1);
    }

    #[test]
    fn test_many_in_one_read() {
        let mut wire = BytesMut::new();
        for id in 1..=3 {
            wire.extend_from_slice(&Encoder::encode_envelope(&envelope(id, vec![])).unwrap());
        }

        let mut decoder = Decoder::new();
        decoder.extend(&wire);
        let ids: Vec<i32> = drain(&mut decoder).iter().map(|e| e.rpc_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_bad_json_is_error() {
        let mut decoder = Decoder::new();
        decoder.extend(&crate::frame::encode(b"not json").unwrap());
        assert!(matches!(
            decoder.decode_envelope(),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_clear() {
        let mut decoder = Decoder::new();
        decoder.extend(&[1, 2, 3]);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    proptest! {
        #[test]
        fn prop_bytewise_matches_block(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..64), 1..8)
        ) {
            let mut wire = BytesMut::new();
            for (i, data) in payloads.iter().enumerate() {
                let env = envelope(i as i32 + 1, data.clone());
                wire.extend_from_slice(&Encoder::encode_envelope(&env).unwrap());
            }

            let mut block = Decoder::new();
            block.extend(&wire);
            let from_block = drain(&mut block);

            let mut bytewise = Decoder::new();
            let mut from_bytes = Vec::new();
            for b in wire.iter() {
                bytewise.extend(std::slice::from_ref(b));
                from_bytes.extend(drain(&mut bytewise));
            }

            prop_assert_eq!(from_block.len(), payloads.len());
            prop_assert_eq!(from_block, from_bytes);
            prop_assert_eq!(bytewise.buffered(), 0);
        }
    }
}
