//! Parsed device responses and typed payload decoders.

use std::fmt;

use serde::Serialize;

use crate::error::Error;
use crate::protocol::DeviceClass;

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    /// Command accepted; payload holds the value, if any.
    #[serde(rename = "OK")]
    Ok,
    /// ERR1: undefined command.
    #[serde(rename = "ERR1")]
    UndefinedCommand,
    /// ERR2: parameter out of range.
    #[serde(rename = "ERR2")]
    OutOfParameter,
    /// ERR3: device busy or unavailable right now.
    #[serde(rename = "ERR3")]
    Unavailable,
    /// ERR4: projector or display failure.
    #[serde(rename = "ERR4")]
    ProjectorFailure,
    /// ERRA: authentication error.
    #[serde(rename = "ERRA")]
    AuthError,
}

impl Status {
    /// Map an error value; anything else is a payload.
    pub fn from_error_value(value: &str) -> Option<Self> {
        match value {
            "ERR1" => Some(Status::UndefinedCommand),
            "ERR2" => Some(Status::OutOfParameter),
            "ERR3" => Some(Status::Unavailable),
            "ERR4" => Some(Status::ProjectorFailure),
            "ERRA" => Some(Status::AuthError),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::UndefinedCommand => "ERR1",
            Status::OutOfParameter => "ERR2",
            Status::Unavailable => "ERR3",
            Status::ProjectorFailure => "ERR4",
            Status::AuthError => "ERRA",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::UndefinedCommand => "undefined command",
            Status::OutOfParameter => "parameter out of range",
            Status::Unavailable => "device busy or unavailable",
            Status::ProjectorFailure => "projector failure",
            Status::AuthError => "authentication error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// A parsed response line. Only the codec constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    operation: String,
    class: DeviceClass,
    status: Status,
    payload: String,
}

impl Response {
    pub(crate) fn new(operation: String, class: DeviceClass, status: Status, payload: String) -> Self {
        Self {
            operation,
            class,
            status,
            payload,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Decode a `POWR ?` answer.
    pub fn power_state(&self) -> Result<PowerState, Error> {
        match self.payload.as_str() {
            "0" => Ok(PowerState::Off),
            "1" => Ok(PowerState::On),
            "2" => Ok(PowerState::Cooling),
            "3" => Ok(PowerState::WarmUp),
            other => Err(bad_payload("POWR", other)),
        }
    }

    /// Decode a `LAMP ?` answer: `hours on [hours on ...]`.
    pub fn lamps(&self) -> Result<Vec<LampStatus>, Error> {
        let fields: Vec<&str> = self.payload.split_whitespace().collect();
        if fields.is_empty() || fields.len() % 2 != 0 {
            return Err(bad_payload("LAMP", &self.payload));
        }
        fields
            .chunks(2)
            .map(|pair| {
                let hours = pair[0]
                    .parse::<u32>()
                    .map_err(|_| bad_payload("LAMP", &self.payload))?;
                let on = match pair[1] {
                    "0" => false,
                    "1" => true,
                    _ => return Err(bad_payload("LAMP", &self.payload)),
                };
                Ok(LampStatus { hours, on })
            })
            .collect()
    }

    /// Decode an `ERST ?` answer: six digits, one per component.
    pub fn error_status(&self) -> Result<ErrorReport, Error> {
        let digits: Vec<FaultLevel> = self
            .payload
            .chars()
            .map(|c| match c {
                '0' => Ok(FaultLevel::Ok),
                '1' => Ok(FaultLevel::Warning),
                '2' => Ok(FaultLevel::Error),
                _ => Err(bad_payload("ERST", &self.payload)),
            })
            .collect::<Result<_, _>>()?;
        if digits.len() != 6 {
            return Err(bad_payload("ERST", &self.payload));
        }
        Ok(ErrorReport {
            fan: digits[0],
            lamp: digits[1],
            temperature: digits[2],
            cover: digits[3],
            filter: digits[4],
            other: digits[5],
        })
    }

    /// Decode an `AVMT ?` answer.
    pub fn av_mute(&self) -> Result<AvMuteState, Error> {
        match self.payload.as_str() {
            "11" => Ok(AvMuteState { video: true, audio: false }),
            "21" => Ok(AvMuteState { video: false, audio: true }),
            "31" => Ok(AvMuteState { video: true, audio: true }),
            "10" | "20" | "30" => Ok(AvMuteState { video: false, audio: false }),
            other => Err(bad_payload("AVMT", other)),
        }
    }

    /// Decode an `INST ?` answer into terminal codes.
    pub fn inputs(&self) -> Vec<String> {
        self.payload.split_whitespace().map(str::to_string).collect()
    }

    /// Decode a `CLSS ?` answer.
    pub fn device_class(&self) -> Result<DeviceClass, Error> {
        let mut chars = self.payload.chars();
        match (chars.next().and_then(DeviceClass::from_digit), chars.next()) {
            (Some(class), None) => Ok(class),
            _ => Err(bad_payload("CLSS", &self.payload)),
        }
    }
}

fn bad_payload(op: &str, payload: &str) -> Error {
    Error::Protocol(format!("unexpected {op} payload {payload:?}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Off,
    On,
    Cooling,
    WarmUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LampStatus {
    pub hours: u32,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultLevel {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub fan: FaultLevel,
    pub lamp: FaultLevel,
    pub temperature: FaultLevel,
    pub cover: FaultLevel,
    pub filter: FaultLevel,
    pub other: FaultLevel,
}

impl ErrorReport {
    pub fn is_clear(&self) -> bool {
        [self.fan, self.lamp, self.temperature, self.cover, self.filter, self.other]
            .iter()
            .all(|level| *level == FaultLevel::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvMuteState {
    pub video: bool,
    pub audio: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(op: &str, payload: &str) -> Response {
        Response::new(op.into(), DeviceClass::One, Status::Ok, payload.into())
    }

    #[test]
    fn power_states() {
        assert_eq!(ok("POWR", "0").power_state().unwrap(), PowerState::Off);
        assert_eq!(ok("POWR", "3").power_state().unwrap(), PowerState::WarmUp);
        assert!(ok("POWR", "9").power_state().is_err());
    }

    #[test]
    fn lamp_pairs() {
        let lamps = ok("LAMP", "1200 1 300 0").lamps().unwrap();
        assert_eq!(
            lamps,
            vec![
                LampStatus { hours: 1200, on: true },
                LampStatus { hours: 300, on: false }
            ]
        );
        assert!(ok("LAMP", "1200").lamps().is_err());
        assert!(ok("LAMP", "abc 1").lamps().is_err());
    }

    #[test]
    fn error_status_digits() {
        let report = ok("ERST", "000000").error_status().unwrap();
        assert!(report.is_clear());

        let report = ok("ERST", "021000").error_status().unwrap();
        assert_eq!(report.lamp, FaultLevel::Error);
        assert_eq!(report.temperature, FaultLevel::Warning);
        assert!(!report.is_clear());

        assert!(ok("ERST", "0000").error_status().is_err());
    }

    #[test]
    fn av_mute_and_class() {
        assert_eq!(
            ok("AVMT", "31").av_mute().unwrap(),
            AvMuteState { video: true, audio: true }
        );
        assert_eq!(ok("CLSS", "2").device_class().unwrap(), DeviceClass::Two);
        assert!(ok("CLSS", "12").device_class().is_err());
    }

    #[test]
    fn error_values() {
        assert_eq!(Status::from_error_value("ERRA"), Some(Status::AuthError));
        assert_eq!(Status::from_error_value("OK"), None);
        assert_eq!(Status::Unavailable.code(), "ERR3");
    }
}
