use std::collections::TryReserveError;

use crate::error::MqttError;

/// Outbound packet buffer with a hard size limit, shared by the MQTT adapters.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn resize(&mut self, size: usize) -> Result<(), TryReserveError> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size)?;
        self.bytes = bytes;
        self.limit = size;
        Ok(())
    }

    /// Copy `payload` into the buffer, rejecting anything over the limit.
    pub fn stage(&mut self, payload: &[u8]) -> Result<&[u8], MqttError> {
        if payload.len() > self.limit {
            return Err(MqttError::PayloadTooLarge {
                len: payload.len(),
                capacity: self.limit,
            });
        }
        self.bytes.clear();
        self.bytes.extend_from_slice(payload);
        Ok(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_payload_over_limit() {
        let mut buffer = PacketBuffer::new();
        buffer.resize(4).unwrap();

        assert_eq!(buffer.stage(b"abcd").unwrap(), b"abcd");
        assert_eq!(
            buffer.stage(b"abcde"),
            Err(MqttError::PayloadTooLarge {
                len: 5,
                capacity: 4
            })
        );
    }

    #[test]
    fn unsized_buffer_rejects_everything() {
        let mut buffer = PacketBuffer::new();
        assert!(buffer.stage(b"x").is_err());
        assert!(buffer.stage(b"").is_ok());
    }

    #[test]
    fn absurd_size_fails_to_allocate() {
        let mut buffer = PacketBuffer::new();
        buffer.resize(16).unwrap();
        assert!(buffer.resize(usize::MAX).is_err());
        assert_eq!(buffer.limit(), 16);
    }
}
