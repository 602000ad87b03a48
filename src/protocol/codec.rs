//! Wire encoding and parsing.

use crate::error::Error;
use crate::protocol::{
    AuthChallenge, Command, DeviceClass, Response, Status, MAX_PARAMETER_LEN, MAX_RESPONSE_LEN,
};

const AUTH_FAILURE_LINE: &str = "PJLINK ERRA";
const DIGEST_LEN: usize = 32;
const LINE_BREAKS: &[char] = &['\r', '\n'];

/// Encode `cmd` as `%{class}{OP} {PARAM}\r`.
pub fn encode(cmd: &Command) -> Result<Vec<u8>, Error> {
    let op = cmd.operation();
    if !op.is_ascii() || op.len() != 4 || !op.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(Error::Encoding(format!(
            "operation code must be 4 printable ASCII characters, got {op:?}"
        )));
    }

    let parameter = cmd.parameter();
    if parameter.is_empty() {
        return Err(Error::Encoding(format!("{op} has an empty parameter")));
    }
    if parameter.len() > MAX_PARAMETER_LEN {
        return Err(Error::Encoding(format!(
            "{op} parameter is {} bytes (max {MAX_PARAMETER_LEN})",
            parameter.len()
        )));
    }
    if parameter.chars().any(char::is_control) {
        return Err(Error::Encoding(format!(
            "{op} parameter contains control characters"
        )));
    }

    Ok(format!("%{}{} {}\r", cmd.class().digit(), op, parameter).into_bytes())
}

/// Parse `%{class}{OP}={VALUE}\r` as the answer to `request`.
pub fn parse_response(bytes: &[u8], request: &Command) -> Result<Response, Error> {
    if bytes.len() > MAX_RESPONSE_LEN {
        return Err(Error::Protocol(format!(
            "response is {} bytes (max {MAX_RESPONSE_LEN})",
            bytes.len()
        )));
    }
    let line = decode_line(bytes)?;
    if line.is_empty() {
        return Err(Error::Protocol("empty response".into()));
    }
    if line.starts_with(AUTH_FAILURE_LINE) {
        return Err(Error::Authentication);
    }

    let body = line
        .strip_prefix('%')
        .ok_or_else(|| Error::Protocol(format!("response does not start with '%': {line:?}")))?;
    let (header, value) = body
        .split_once('=')
        .ok_or_else(|| Error::Protocol(format!("response has no '=': {line:?}")))?;

    let mut header_chars = header.chars();
    let class = header_chars
        .next()
        .and_then(DeviceClass::from_digit)
        .ok_or_else(|| Error::Protocol(format!("bad class in response: {line:?}")))?;
    let operation = header_chars.as_str();
    if operation.len() != 4 {
        return Err(Error::Protocol(format!("truncated response header: {line:?}")));
    }
    if !operation.eq_ignore_ascii_case(request.operation()) {
        return Err(Error::Protocol(format!(
            "response for {operation} does not match request {}",
            request.operation()
        )));
    }
    if class != request.class() {
        return Err(Error::ClassMismatch {
            requested: request.class(),
            actual: class,
        });
    }

    let (status, payload) = match Status::from_error_value(value) {
        Some(status) => (status, String::new()),
        None => (Status::Ok, value.to_string()),
    };
    Ok(Response::new(operation.to_string(), class, status, payload))
}

/// Parse the first line a device sends after connect.
pub fn parse_greeting(bytes: &[u8]) -> Result<AuthChallenge, Error> {
    let line = decode_line(bytes)?;
    if line == "PJLINK 0" {
        return Ok(AuthChallenge::None);
    }
    if let Some(seed) = line.strip_prefix("PJLINK 1 ") {
        let seed = seed.trim();
        if !seed.is_empty() && seed.bytes().all(|b| b.is_ascii_graphic()) {
            return Ok(AuthChallenge::Required {
                seed: seed.to_string(),
            });
        }
    }
    Err(Error::Protocol(format!("unexpected greeting {line:?}")))
}

/// A request line as a device sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    /// Hex digest prefix, present on the first request of an authenticated session.
    pub auth_prefix: Option<String>,
    pub class: DeviceClass,
    pub operation: String,
    pub parameter: String,
}

/// Decode `[{digest}]%{class}{OP} {PARAM}\r`. Used by device simulators.
pub fn parse_request(bytes: &[u8]) -> Result<DecodedRequest, Error> {
    let line = decode_line(bytes)?;
    let start = line
        .find('%')
        .ok_or_else(|| Error::Protocol(format!("request has no '%': {line:?}")))?;
    let auth_prefix = match start {
        0 => None,
        DIGEST_LEN if line[..start].bytes().all(|b| b.is_ascii_hexdigit()) => {
            Some(line[..start].to_string())
        }
        _ => {
            return Err(Error::Protocol(format!(
                "malformed auth prefix in request: {line:?}"
            )))
        }
    };

    let body = &line[start + 1..];
    let (header, parameter) = body
        .split_once(' ')
        .ok_or_else(|| Error::Protocol(format!("request has no parameter: {line:?}")))?;
    let mut header_chars = header.chars();
    let class = header_chars
        .next()
        .and_then(DeviceClass::from_digit)
        .ok_or_else(|| Error::Protocol(format!("bad class in request: {line:?}")))?;
    let operation = header_chars.as_str();
    if operation.len() != 4 {
        return Err(Error::Protocol(format!("truncated request header: {line:?}")));
    }

    Ok(DecodedRequest {
        auth_prefix,
        class,
        operation: operation.to_string(),
        parameter: parameter.to_string(),
    })
}

fn decode_line(bytes: &[u8]) -> Result<&str, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::Protocol("line is not valid UTF-8".into()))?;
    Ok(text
        .trim_start_matches(LINE_BREAKS)
        .trim_end_matches(LINE_BREAKS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Operation;

    /// What a cooperative device would answer to `request`.
    fn echo(request: &[u8], value: &str) -> Vec<u8> {
        let decoded = parse_request(request).unwrap();
        format!("%{}{}={}\r", decoded.class, decoded.operation, value).into_bytes()
    }

    #[test]
    fn encodes_power_on() {
        assert_eq!(encode(&Command::power_on()).unwrap(), b"%1POWR 1\r");
        assert_eq!(
            encode(&Command::query(Operation::Lamp)).unwrap(),
            b"%1LAMP ?\r"
        );
    }

    #[test]
    fn rejects_bad_operation_codes() {
        for op in ["POW", "POWER", "PÖWR", "PO R", ""] {
            let cmd = Command::raw(op, "?", DeviceClass::One);
            assert!(matches!(encode(&cmd), Err(Error::Encoding(_))), "{op:?}");
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        let cmd = Command::raw("NAME", "", DeviceClass::One);
        assert!(matches!(encode(&cmd), Err(Error::Encoding(_))));
        let cmd = Command::raw("NAME", "a\rb", DeviceClass::One);
        assert!(matches!(encode(&cmd), Err(Error::Encoding(_))));
        let cmd = Command::raw("NAME", "x".repeat(MAX_PARAMETER_LEN + 1), DeviceClass::One);
        assert!(matches!(encode(&cmd), Err(Error::Encoding(_))));
    }

    #[test]
    fn every_operation_survives_device_echo() {
        for op in Operation::ALL {
            let cmd = Command::raw(op.code(), "?", op.min_class());
            let wire = encode(&cmd).unwrap();
            let response = parse_response(&echo(&wire, "1"), &cmd).unwrap();
            assert_eq!(response.operation(), op.code());
            assert_eq!(response.class(), op.min_class());
            assert_eq!(response.payload(), "1");
        }
    }

    #[test]
    fn parses_ok_and_error_values() {
        let cmd = Command::power_on();
        let r = parse_response(b"%1POWR=OK\r", &cmd).unwrap();
        assert_eq!(r.status(), Status::Ok);
        assert_eq!(r.payload(), "OK");

        let r = parse_response(b"%1POWR=ERR3\r", &cmd).unwrap();
        assert_eq!(r.status(), Status::Unavailable);
        assert_eq!(r.payload(), "");

        let r = parse_response(b"%1POWR=ERRA\r\n", &cmd).unwrap();
        assert_eq!(r.status(), Status::AuthError);
    }

    #[test]
    fn payload_keeps_inner_spaces() {
        let cmd = Command::query(Operation::Name);
        let r = parse_response(b"%1NAME=Main Hall Left\r", &cmd).unwrap();
        assert_eq!(r.payload(), "Main Hall Left");
    }

    #[test]
    fn malformed_lines_are_protocol_errors() {
        let cmd = Command::power_on();
        for line in [
            &b""[..],
            b"\r",
            b"1POWR=OK\r",
            b"%1POWR OK\r",
            b"%1POW=OK\r",
            b"%xPOWR=OK\r",
            b"%1INPT=OK\r",
            b"%",
            b"\xff\xfe",
        ] {
            assert!(
                matches!(parse_response(line, &cmd), Err(Error::Protocol(_))),
                "{line:?}"
            );
        }
    }

    #[test]
    fn oversized_line_is_rejected() {
        let cmd = Command::query(Operation::Name);
        let mut line = b"%1NAME=".to_vec();
        line.extend(std::iter::repeat(b'a').take(MAX_RESPONSE_LEN));
        assert!(matches!(parse_response(&line, &cmd), Err(Error::Protocol(_))));
    }

    #[test]
    fn class_mismatch_is_reported() {
        let cmd = Command::set_at(Operation::Input, "31", DeviceClass::Two).unwrap();
        match parse_response(b"%1INPT=OK\r", &cmd) {
            Err(Error::ClassMismatch { requested, actual }) => {
                assert_eq!(requested, DeviceClass::Two);
                assert_eq!(actual, DeviceClass::One);
            }
            other => panic!("expected class mismatch, got {other:?}"),
        }
    }

    #[test]
    fn auth_failure_line() {
        let cmd = Command::power_on();
        assert!(matches!(
            parse_response(b"PJLINK ERRA\r", &cmd),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn greetings() {
        assert_eq!(parse_greeting(b"PJLINK 0\r").unwrap(), AuthChallenge::None);
        assert_eq!(
            parse_greeting(b"PJLINK 1 abc123\r").unwrap(),
            AuthChallenge::Required {
                seed: "abc123".into()
            }
        );
        for bad in [&b"PJLINK 2\r"[..], b"PJLINK 1 \r", b"HELLO\r", b""] {
            assert!(matches!(parse_greeting(bad), Err(Error::Protocol(_))));
        }
    }

    #[test]
    fn request_with_auth_prefix() {
        let line = b"5d8409bc1c3fa39749434aa3a5c38682%1POWR ?\r";
        let req = parse_request(line).unwrap();
        assert_eq!(
            req.auth_prefix.as_deref(),
            Some("5d8409bc1c3fa39749434aa3a5c38682")
        );
        assert_eq!(req.operation, "POWR");
        assert_eq!(req.parameter, "?");

        assert!(parse_request(b"abc%1POWR ?\r").is_err());
        assert!(parse_request(b"%1POWR\r").is_err());
    }
}
