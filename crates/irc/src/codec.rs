/// Line codec framing a TCP byte stream into IRC messages.
///
/// Lines end in `\r\n`; a bare `\n` is accepted on input.
use {
    bytes::{Buf, BufMut, BytesMut},
    tokio_util::codec::{Decoder, Encoder},
    tracing::debug,
};

use crate::message::Message;

/// Maximum line length including the terminator. IRCv3 tags raise the
/// classic 512 byte limit.
const MAX_LINE_LENGTH: usize = 8191;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };
            if pos + 1 > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong);
            }

            let mut line_bytes = src.split_to(pos);
            src.advance(1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            let line = std::str::from_utf8(&line_bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            // A decoder error ends the stream, so unparseable lines are skipped.
            match Message::parse(line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => debug!(error = %e, "skipping unparseable line"),
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        if wire.contains(['\r', '\n']) {
            return Err(CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "outgoing message contains a line break",
            )));
        }
        if wire.len() + 2 > MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong);
        }
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_partial_then_complete() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("PING :tmi.tw");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"itch.tv\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_two_lines_and_bare_newline() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(":tmi.twitch.tv 001 bot :Welcome\r\nPING :x\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, "001");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, "PING");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_skips_blank_and_malformed_lines() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("\r\n:prefix-only\r\nPONG :x\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command, "PONG");
    }

    #[test]
    fn decode_rejects_oversized_line() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from("A".repeat(MAX_LINE_LENGTH + 1).as_str());
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::LineTooLong)));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"PRIVMSG #x :\xff\xfe\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Io(_))));
    }

    #[test]
    fn encode_appends_crlf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new("JOIN", vec!["#foo".into()]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"JOIN #foo\r\n");
    }

    #[test]
    fn encode_refuses_embedded_newlines() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();
        let msg = Message::new("PRIVMSG", vec!["#foo".into(), "a\r\nQUIT".into()]);
        assert!(codec.encode(msg, &mut buf).is_err());
        assert!(buf.is_empty());
    }
}
