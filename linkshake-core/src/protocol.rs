//! Handshake payloads: control tokens and data, carried as NUL-terminated strings.

/// Payload of the discovery broadcast.
pub const ANNOUNCE_PAYLOAD: &[u8] = b"add_me";

/// Default application payload sent after CTS.
pub const DEFAULT_DATA_PAYLOAD: &[u8] = b"some data";

const RTS: &[u8] = b"RTS";
const CTS: &[u8] = b"CTS";
const ACK: &[u8] = b"ACK";

/// Unicast payload, validated when the frame is received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Request to send.
    Rts,
    /// Clear to send.
    Cts,
    /// Data acknowledged; the initiator starts the next cycle.
    Ack,
    /// Anything that is not a control token.
    Data(Vec<u8>),
}

impl Token {
    /// Wire form: token text followed by a NUL terminator.
    pub fn to_payload(&self) -> Vec<u8> {
        let text = match self {
            Token::Rts => RTS,
            Token::Cts => CTS,
            Token::Ack => ACK,
            Token::Data(bytes) => bytes.as_slice(),
        };
        let mut out = Vec::with_capacity(text.len() + 1);
        out.extend_from_slice(text);
        out.push(0);
        out
    }

    /// Parse a received payload. Everything after the first NUL is ignored.
    pub fn from_payload(payload: &[u8]) -> Result<Self, TokenError> {
        let end = payload
            .iter()
            .position(|&b| b == 0)
            .ok_or(TokenError::Unterminated)?;
        Ok(match &payload[..end] {
            RTS => Token::Rts,
            CTS => Token::Cts,
            ACK => Token::Ack,
            text => Token::Data(text.to_vec()),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Token::Rts => "RTS",
            Token::Cts => "CTS",
            Token::Ack => "ACK",
            Token::Data(_) => "data",
        }
    }
}

/// Error validating a received payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("payload is not NUL-terminated")]
    Unterminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_tokens_are_four_bytes_on_wire() {
        assert_eq!(Token::Rts.to_payload(), b"RTS\0");
        assert_eq!(Token::Cts.to_payload(), b"CTS\0");
        assert_eq!(Token::Ack.to_payload(), b"ACK\0");
    }

    #[test]
    fn data_payload_matches_reference_length() {
        let payload = Token::Data(DEFAULT_DATA_PAYLOAD.to_vec()).to_payload();
        assert_eq!(payload, b"some data\0");
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn parse_control_tokens() {
        assert_eq!(Token::from_payload(b"RTS\0"), Ok(Token::Rts));
        assert_eq!(Token::from_payload(b"CTS\0"), Ok(Token::Cts));
        assert_eq!(Token::from_payload(b"ACK\0"), Ok(Token::Ack));
    }

    #[test]
    fn parse_ignores_trailing_bytes() {
        assert_eq!(Token::from_payload(b"ACK\0garbage"), Ok(Token::Ack));
    }

    #[test]
    fn near_miss_is_data() {
        assert_eq!(
            Token::from_payload(b"RTSX\0"),
            Ok(Token::Data(b"RTSX".to_vec()))
        );
        assert_eq!(Token::from_payload(b"\0"), Ok(Token::Data(Vec::new())));
    }

    #[test]
    fn unterminated_rejected() {
        assert_eq!(Token::from_payload(b"RTS"), Err(TokenError::Unterminated));
        assert_eq!(Token::from_payload(b""), Err(TokenError::Unterminated));
    }
}
