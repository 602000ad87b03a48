//! Commands and the closed set of PJLink operations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// PJLink command tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceClass {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl DeviceClass {
    /// The ASCII digit used on the wire.
    pub fn digit(self) -> char {
        match self {
            DeviceClass::One => '1',
            DeviceClass::Two => '2',
        }
    }

    /// Parse the wire digit.
    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '1' => Some(DeviceClass::One),
            '2' => Some(DeviceClass::Two),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digit())
    }
}

/// Every operation the client knows how to encode and decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    // Class 1
    Power,
    Input,
    AvMute,
    ErrorStatus,
    Lamp,
    InputList,
    Name,
    Manufacturer,
    ProductName,
    OtherInfo,
    Class,
    // Class 2
    SerialNumber,
    SoftwareVersion,
    InputTerminalName,
    InputResolution,
    RecommendedResolution,
    FilterUsage,
    LampReplacementModel,
    FilterReplacementModel,
    SpeakerVolume,
    MicrophoneVolume,
    Freeze,
}

impl Operation {
    pub const ALL: [Operation; 22] = [
        Operation::Power,
        Operation::Input,
        Operation::AvMute,
        Operation::ErrorStatus,
        Operation::Lamp,
        Operation::InputList,
        Operation::Name,
        Operation::Manufacturer,
        Operation::ProductName,
        Operation::OtherInfo,
        Operation::Class,
        Operation::SerialNumber,
        Operation::SoftwareVersion,
        Operation::InputTerminalName,
        Operation::InputResolution,
        Operation::RecommendedResolution,
        Operation::FilterUsage,
        Operation::LampReplacementModel,
        Operation::FilterReplacementModel,
        Operation::SpeakerVolume,
        Operation::MicrophoneVolume,
        Operation::Freeze,
    ];

    /// Four-character wire code.
    pub fn code(self) -> &'static str {
        match self {
            Operation::Power => "POWR",
            Operation::Input => "INPT",
            Operation::AvMute => "AVMT",
            Operation::ErrorStatus => "ERST",
            Operation::Lamp => "LAMP",
            Operation::InputList => "INST",
            Operation::Name => "NAME",
            Operation::Manufacturer => "INF1",
            Operation::ProductName => "INF2",
            Operation::OtherInfo => "INFO",
            Operation::Class => "CLSS",
            Operation::SerialNumber => "SNUM",
            Operation::SoftwareVersion => "SVER",
            Operation::InputTerminalName => "INNM",
            Operation::InputResolution => "IRES",
            Operation::RecommendedResolution => "RRES",
            Operation::FilterUsage => "FILT",
            Operation::LampReplacementModel => "RLMP",
            Operation::FilterReplacementModel => "RFIL",
            Operation::SpeakerVolume => "SVOL",
            Operation::MicrophoneVolume => "MVOL",
            Operation::Freeze => "FREZ",
        }
    }

    /// Look up an operation by wire code (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.code().eq_ignore_ascii_case(code))
    }

    /// Lowest class that defines this operation.
    pub fn min_class(self) -> DeviceClass {
        match self {
            Operation::Power
            | Operation::Input
            | Operation::AvMute
            | Operation::ErrorStatus
            | Operation::Lamp
            | Operation::InputList
            | Operation::Name
            | Operation::Manufacturer
            | Operation::ProductName
            | Operation::OtherInfo
            | Operation::Class => DeviceClass::One,
            _ => DeviceClass::Two,
        }
    }

    /// Whether a query (`?`) is defined.
    pub fn is_queryable(self) -> bool {
        !matches!(self, Operation::SpeakerVolume | Operation::MicrophoneVolume)
    }

    /// Whether a set parameter is defined.
    pub fn is_settable(self) -> bool {
        matches!(
            self,
            Operation::Power
                | Operation::Input
                | Operation::AvMute
                | Operation::SpeakerVolume
                | Operation::MicrophoneVolume
                | Operation::Freeze
        )
    }

    /// Check a set parameter against the operation's grammar.
    pub fn validate_parameter(self, parameter: &str, class: DeviceClass) -> Result<(), Error> {
        if !self.is_settable() {
            return Err(Error::Encoding(format!("{} cannot be set", self.code())));
        }
        let valid = match self {
            Operation::Power | Operation::Freeze => matches!(parameter, "0" | "1"),
            Operation::SpeakerVolume | Operation::MicrophoneVolume => {
                matches!(parameter, "0" | "1")
            }
            Operation::AvMute => matches!(parameter, "10" | "11" | "20" | "21" | "30" | "31"),
            Operation::Input => is_valid_input(parameter, class),
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(Error::Encoding(format!(
                "invalid {} parameter {:?} for class {}",
                self.code(),
                parameter,
                class
            )))
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Input terminal: source type digit then a terminal number.
///
/// Class 1 allows types 1-5 and numbers 1-9; class 2 adds type 6 (internal
/// storage) and terminal numbers A-Z.
fn is_valid_input(parameter: &str, class: DeviceClass) -> bool {
    let bytes = parameter.as_bytes();
    if bytes.len() != 2 {
        return false;
    }
    let (kind, number) = (bytes[0], bytes[1]);
    match class {
        DeviceClass::One => (b'1'..=b'5').contains(&kind) && (b'1'..=b'9').contains(&number),
        DeviceClass::Two => {
            (b'1'..=b'6').contains(&kind)
                && ((b'1'..=b'9').contains(&number) || number.is_ascii_uppercase())
        }
    }
}

/// One logical request to a projector.
///
/// The operation code is kept as text so vendor extensions can be sent
/// through [`Command::raw`]; [`crate::protocol::encode`] enforces the wire
/// rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    operation: String,
    parameter: String,
    class: DeviceClass,
}

impl Command {
    /// Build a command without grammar checks.
    pub fn raw(operation: impl Into<String>, parameter: impl Into<String>, class: DeviceClass) -> Self {
        Self {
            operation: operation.into(),
            parameter: parameter.into(),
            class,
        }
    }

    /// Query the current value of `op` at its minimum class.
    pub fn query(op: Operation) -> Self {
        Self::raw(op.code(), "?", op.min_class())
    }

    /// Query with an argument, e.g. `INNM ?11`.
    pub fn query_with(op: Operation, argument: &str) -> Self {
        Self::raw(op.code(), format!("?{argument}"), op.min_class())
    }

    /// Set `op` at its minimum class.
    pub fn set(op: Operation, parameter: &str) -> Result<Self, Error> {
        Self::set_at(op, parameter, op.min_class())
    }

    /// Set `op` at an explicit class.
    pub fn set_at(op: Operation, parameter: &str, class: DeviceClass) -> Result<Self, Error> {
        if class < op.min_class() {
            return Err(Error::Encoding(format!(
                "{} requires class {}",
                op.code(),
                op.min_class()
            )));
        }
        op.validate_parameter(parameter, class)?;
        Ok(Self::raw(op.code(), parameter, class))
    }

    pub fn power_on() -> Self {
        Self::raw(Operation::Power.code(), "1", DeviceClass::One)
    }

    pub fn power_off() -> Self {
        Self::raw(Operation::Power.code(), "0", DeviceClass::One)
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// True for `?` and `?{arg}` parameters.
    pub fn is_query(&self) -> bool {
        self.parameter.starts_with('?')
    }

    /// The known operation, if the code is one.
    pub fn known_operation(&self) -> Option<Operation> {
        Operation::from_code(&self.operation)
    }

    /// Same command re-targeted at another class.
    pub fn with_class(&self, class: DeviceClass) -> Self {
        Self {
            class,
            ..self.clone()
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}{} {}", self.class, self.operation, self.parameter)
    }
}
