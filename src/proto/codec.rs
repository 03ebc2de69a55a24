use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use std::fmt::{self, Write};
use std::io;
use std::str;
use tokio_util::codec::{Decoder, Encoder};

use super::{command::Command, response::Response};

const EOL: u8 = b'\n';
const BLOCK_START: u8 = b'#';
const BLOCK_HEADER_LEN: usize = 2; // '#' and the digit count

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Reply {
    Line,
    Block,
}

/// Line based SCPI codec with IEEE 488.2 definite length blocks.
///
/// The encoder remembers which kind of reply each written command expects,
/// the decoder uses that to tell text lines from binary blocks.
#[derive(Debug, Default)]
pub struct ScpiCodec {
    pending: VecDeque<Reply>,
    after_block: bool,
}

impl ScpiCodec {
    fn decode_line(src: &mut BytesMut) -> Result<Option<Response>, io::Error> {
        match src.iter().position(|b| *b == EOL) {
            Some(pos) => {
                let line = src.split_to(pos + 1);
                let text = str::from_utf8(&line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(Response::Line(
                    text.trim_end_matches(['\r', '\n']).to_string(),
                )))
            }
            None => Ok(None), // Not enough bytes yet
        }
    }

    fn decode_block(src: &mut BytesMut) -> Result<Option<Response>, io::Error> {
        if src.len() < BLOCK_HEADER_LEN {
            return Ok(None);
        }
        if src[0] != BLOCK_START {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Block reply expected, got {:?}", src[0] as char),
            ));
        }
        let digits = (src[1] as char).to_digit(10).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "Invalid block header")
        })? as usize;

        if digits == 0 {
            // Indefinite length, terminated by the end of line
            return match src.iter().skip(BLOCK_HEADER_LEN).position(|b| *b == EOL) {
                Some(len) => {
                    src.advance(BLOCK_HEADER_LEN);
                    let data = src.split_to(len).freeze();
                    src.advance(1);
                    Ok(Some(Response::Block(data)))
                }
                None => Ok(None),
            };
        }

        let header_len = BLOCK_HEADER_LEN + digits;
        if src.len() < header_len {
            return Ok(None);
        }
        let len = str::from_utf8(&src[BLOCK_HEADER_LEN..header_len])
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Invalid block length"))?;
        if src.len() < header_len + len {
            return Ok(None); // Not enough bytes yet
        }
        src.advance(header_len);
        Ok(Some(Response::Block(src.split_to(len).freeze())))
    }
}

impl Decoder for ScpiCodec {
    type Item = Response;
    // Framing problems only, a reply that parses but makes no sense
    // is judged by the device layer.
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.after_block {
            // The terminator of a block may trail in a later read.
            let skip = src.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
            src.advance(skip);
            if src.is_empty() {
                return Ok(None);
            }
            self.after_block = false;
        }

        let Some(reply) = self.pending.front().copied() else {
            if src.is_empty() {
                return Ok(None);
            }
            log::warn!("Discarding {} bytes received without a pending query", src.len());
            src.clear();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Data received without a pending query",
            ));
        };

        let response = match reply {
            Reply::Line => Self::decode_line(src)?,
            Reply::Block => Self::decode_block(src)?,
        };
        if let Some(response) = &response {
            self.pending.pop_front();
            self.after_block = reply == Reply::Block;
            match response {
                Response::Line(line) => log::trace!("<- {}", line),
                Response::Block(data) => log::trace!("<- block of {} bytes", data.len()),
            }
        }
        Ok(response)
    }
}

fn write_fmt_guarded(dst: &mut BytesMut, args: fmt::Arguments<'_>) -> Result<(), io::Error> {
    dst.write_fmt(args)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

impl Encoder<Command> for ScpiCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        log::debug!("-> {}", item.text());
        write_fmt_guarded(dst, format_args!("{}\n", item.text()))?;
        match item {
            Command::Write(_) => {}
            Command::Query(_) => self.pending.push_back(Reply::Line),
            Command::QueryBlock(_) => self.pending.push_back(Reply::Block),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec_expecting(command: Command) -> (ScpiCodec, BytesMut) {
        let mut codec = ScpiCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(command, &mut dst).unwrap();
        (codec, dst)
    }

    #[test]
    fn test_encode_appends_newline() {
        let (_, dst) = codec_expecting(Command::Write(":HORI:SCAL 200us".into()));
        assert_eq!(&dst[..], b":HORI:SCAL 200us\n");
    }

    #[test]
    fn test_decode_line() {
        let (mut codec, _) = codec_expecting(Command::Query(":HORI:SCAL?".into()));
        let mut src = BytesMut::from(&b"500u"[..]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(b"s\r\n");
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Response::Line("500us".into()))
        );
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_block() {
        let (mut codec, _) = codec_expecting(Command::QueryBlock(":WAV:FETC?".into()));
        let mut src = BytesMut::from(&b"#14\x00\x19"[..]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(b"\xff\xff");
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Response::Block(bytes::Bytes::from_static(b"\x00\x19\xff\xff")))
        );
        // trailing terminator is swallowed
        src.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_block_then_line() {
        let mut codec = ScpiCodec::default();
        let mut dst = BytesMut::new();
        codec
            .encode(Command::QueryBlock(":WAV:FETC?".into()), &mut dst)
            .unwrap();
        codec
            .encode(Command::Query(":CH1:SCAL?".into()), &mut dst)
            .unwrap();
        let mut src = BytesMut::from(&b"#202\x01\x00\n2mV\n"[..]);
        assert!(matches!(
            codec.decode(&mut src).unwrap(),
            Some(Response::Block(_))
        ));
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Response::Line("2mV".into()))
        );
    }

    #[test]
    fn test_decode_indefinite_block() {
        let (mut codec, _) = codec_expecting(Command::QueryBlock(":WAV:FETC?".into()));
        let mut src = BytesMut::from(&b"#0\x01\x02\n"[..]);
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(Response::Block(bytes::Bytes::from_static(b"\x01\x02")))
        );
    }

    #[test]
    fn test_decode_invalid_block_header() {
        let (mut codec, _) = codec_expecting(Command::QueryBlock(":WAV:FETC?".into()));
        let mut src = BytesMut::from(&b"ERR\n"[..]);
        assert!(codec.decode(&mut src).is_err());

        let (mut codec, _) = codec_expecting(Command::QueryBlock(":WAV:FETC?".into()));
        let mut src = BytesMut::from(&b"#2x4abcd"[..]);
        assert!(codec.decode(&mut src).is_err());
    }

    #[test]
    fn test_decode_unsolicited_data() {
        let mut codec = ScpiCodec::default();
        let mut src = BytesMut::new();
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(b"garbage\n");
        assert!(codec.decode(&mut src).is_err());
        assert!(src.is_empty());
    }
}
