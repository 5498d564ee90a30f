//! Shared wire format for the remote server/client protocol: ASCII
//! LF-terminated lines, responses of the form `<3-digit code>
//! <message>\n`, with a binary extension (`380`) whose message is a
//! decimal byte count followed by exactly that many raw bytes before
//! the next line.
//!
//! Split into a separate `Encoder`/`Decoder` pair per connection role,
//! framed with `tokio_util::codec`.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    Ready = 220,
    Ok = 250,
    Progress = 251,
    False = 252,
    Binary = 380,
    Unrecognized = 500,
    BadValue = 501,
    Unsupported = 502,
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    fn from_u16(code: u16) -> Option<ResponseCode> {
        Some(match code {
            220 => ResponseCode::Ready,
            250 => ResponseCode::Ok,
            251 => ResponseCode::Progress,
            252 => ResponseCode::False,
            380 => ResponseCode::Binary,
            500 => ResponseCode::Unrecognized,
            501 => ResponseCode::BadValue,
            502 => ResponseCode::Unsupported,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub code: ResponseCode,
    pub message: String,
    pub binary: Option<Vec<u8>>,
}

impl Response {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Response {
        Response { code, message: message.into(), binary: None }
    }

    pub fn ready(message: impl Into<String>) -> Response {
        Response::new(ResponseCode::Ready, message)
    }

    pub fn ok(message: impl Into<String>) -> Response {
        Response::new(ResponseCode::Ok, message)
    }

    pub fn progress(iterations: f64, density: u64) -> Response {
        Response::new(ResponseCode::Progress, format!("iterations={iterations} density={density}"))
    }

    pub fn binary(data: Vec<u8>) -> Response {
        Response { code: ResponseCode::Binary, message: data.len().to_string(), binary: Some(data) }
    }

    pub fn unrecognized(message: impl Into<String>) -> Response {
        Response::new(ResponseCode::Unrecognized, message)
    }

    pub fn bad_value(message: impl Into<String>) -> Response {
        Response::new(ResponseCode::BadValue, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Response {
        Response::new(ResponseCode::Unsupported, message)
    }
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

/// Splits off one LF-terminated line, without the terminator or a
/// trailing CR. `None` means more bytes are needed.
fn take_line(src: &mut BytesMut) -> io::Result<Option<String>> {
    let Some(pos) = src.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let line = src.split_to(pos + 1);
    let line = strip_cr(&line[..line.len() - 1]);
    let text = std::str::from_utf8(line).map_err(|_| invalid_data("non-UTF-8 protocol line"))?;
    Ok(Some(text.to_string()))
}

/// Server side: decodes incoming command lines, encodes [`Response`]s.
#[derive(Default)]
pub struct ServerProtocol;

impl Decoder for ServerProtocol {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        take_line(src)
    }
}

impl Encoder<Response> for ServerProtocol {
    type Error = io::Error;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> io::Result<()> {
        dst.extend_from_slice(format!("{:03} {}\n", response.code.as_u16(), response.message).as_bytes());
        if let Some(data) = &response.binary {
            dst.extend_from_slice(data);
        }
        Ok(())
    }
}

/// Client side: encodes outgoing command lines, decodes [`Response`]s,
/// including the binary continuation after a `380` line.
#[derive(Default)]
pub struct ClientProtocol {
    pending: Option<(ResponseCode, String, usize)>,
}

impl Encoder<String> for ClientProtocol {
    type Error = io::Error;

    fn encode(&mut self, command: String, dst: &mut BytesMut) -> io::Result<()> {
        dst.extend_from_slice(command.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

impl Decoder for ClientProtocol {
    type Item = Response;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Response>> {
        if let Some((code, message, len)) = self.pending.take() {
            if src.len() < len {
                self.pending = Some((code, message, len));
                return Ok(None);
            }
            let data = src.split_to(len).to_vec();
            return Ok(Some(Response { code, message, binary: Some(data) }));
        }

        let Some(text) = take_line(src)? else {
            return Ok(None);
        };

        let (code_str, message) = text.split_once(' ').unwrap_or((text.as_str(), ""));
        let code_num: u16 =
            code_str.parse().map_err(|_| invalid_data("malformed response code"))?;
        let code = ResponseCode::from_u16(code_num).ok_or_else(|| invalid_data("unknown response code"))?;

        if code == ResponseCode::Binary {
            let len: usize =
                message.trim().parse().map_err(|_| invalid_data("malformed binary length"))?;
            self.pending = Some((code, message.to_string(), len));
            // Binary bytes may already be sitting in the buffer right
            // behind the length line.
            return self.decode(src);
        }

        Ok(Some(Response { code, message: message.to_string(), binary: None }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_protocol_decodes_one_command_per_line() {
        let mut codec = ServerProtocol;
        let mut buf = BytesMut::from(&b"calc_start\ncalc_stop\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "calc_start");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "calc_stop");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn server_protocol_encodes_binary_response_inline() {
        let mut codec = ServerProtocol;
        let mut buf = BytesMut::new();
        codec.encode(Response::binary(vec![1, 2, 3]), &mut buf).unwrap();
        assert_eq!(&buf[..], b"380 3\n\x01\x02\x03");
    }

    #[test]
    fn client_protocol_round_trips_a_plain_response() {
        let mut codec = ClientProtocol::default();
        let mut buf = BytesMut::from(&b"250 ok\n"[..]);
        let response = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(response.code, ResponseCode::Ok);
        assert_eq!(response.message, "ok");
        assert!(response.binary.is_none());
    }

    #[test]
    fn client_protocol_reassembles_a_binary_response_across_reads() {
        let mut codec = ClientProtocol::default();
        let mut buf = BytesMut::from(&b"380 3\n\x01\x02"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\x03");
        let response = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(response.code, ResponseCode::Binary);
        assert_eq!(response.binary.unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn client_protocol_consumes_already_buffered_binary_bytes_immediately() {
        let mut codec = ClientProtocol::default();
        let mut buf = BytesMut::from(&b"380 2\n\xAA\xBB250 ok\n"[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.binary.unwrap(), vec![0xAA, 0xBB]);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.code, ResponseCode::Ok);
    }
}
