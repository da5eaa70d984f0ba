use serde::Deserialize;
use std::fmt;

/// Terminator appended to every request line.
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Two-byte prompt the device prints when it is ready for the next request.
/// Every response (and the banner printed on attach) ends with it.
pub const PROMPT_DELIMITER: &[u8] = b">:";

/// One physical action request for the actuation device.
///
/// Each value maps to exactly one request line of the device CLI:
///
///   ir tx <protocol> <address-hex> <command-hex>
///   vibro <pattern>
///
/// Hex fields are uppercase byte pairs without a prefix, big-endian, using
/// the fewest bytes that hold the value (`0x04` -> `04`, `0xEE87` -> `EE87`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActuationCommand {
    #[serde(rename = "ir")]
    Infrared {
        protocol: String,
        address: u32,
        command: u32,
    },
    Vibro {
        pattern: String,
    },
}

impl ActuationCommand {
    /// Reject commands whose words would break the line protocol.
    pub fn validate(&self) -> Result<(), CommandError> {
        let word = match self {
            ActuationCommand::Infrared { protocol, .. } => protocol,
            ActuationCommand::Vibro { pattern } => pattern,
        };
        if word.is_empty() {
            return Err(CommandError::EmptyWord);
        }
        if word.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CommandError::InvalidWord(word.clone()));
        }
        Ok(())
    }

    /// The request line including the trailing delimiter.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = self.to_string().into_bytes();
        line.extend_from_slice(LINE_DELIMITER);
        line
    }
}

impl fmt::Display for ActuationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuationCommand::Infrared {
                protocol,
                address,
                command,
            } => write!(f, "ir tx {protocol} {} {}", hex_pairs(*address), hex_pairs(*command)),
            ActuationCommand::Vibro { pattern } => write!(f, "vibro {pattern}"),
        }
    }
}

fn hex_pairs(value: u32) -> String {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].iter().map(|b| format!("{b:02X}")).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command word must not be empty")]
    EmptyWord,
    #[error("command word {0:?} contains whitespace or control characters")]
    InvalidWord(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ir(protocol: &str, address: u32, command: u32) -> ActuationCommand {
        ActuationCommand::Infrared {
            protocol: protocol.into(),
            address,
            command,
        }
    }

    #[test]
    fn infrared_line() {
        assert_eq!(ir("NEC", 0x04, 0x09).to_string(), "ir tx NEC 04 09");
        assert_eq!(ir("NECext", 0xEE87, 0x5DA0).to_string(), "ir tx NECext EE87 5DA0");
        assert_eq!(ir("Samsung32", 0x07, 0x0F).to_string(), "ir tx Samsung32 07 0F");
    }

    #[test]
    fn zero_renders_as_one_byte() {
        assert_eq!(ir("RC5", 0, 0).to_string(), "ir tx RC5 00 00");
    }

    #[test]
    fn vibro_line() {
        let cmd = ActuationCommand::Vibro { pattern: "1".into() };
        assert_eq!(cmd.to_string(), "vibro 1");
    }

    #[test]
    fn encode_appends_crlf() {
        assert_eq!(ir("NEC", 0x04, 0x09).encode(), b"ir tx NEC 04 09\r\n".to_vec());
    }

    #[test]
    fn validate_rejects_bad_words() {
        assert!(ir("NEC", 1, 2).validate().is_ok());
        assert!(matches!(ir("", 1, 2).validate(), Err(CommandError::EmptyWord)));
        assert!(matches!(
            ActuationCommand::Vibro { pattern: "1\r\nreboot".into() }.validate(),
            Err(CommandError::InvalidWord(_))
        ));
    }
}
