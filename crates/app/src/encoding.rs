//! On/off value encodings used by the two backend profiles.

use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEncoding {
    /// `{"message": "ON"}` / `{"message": "OFF"}`
    MessageOnOff,
    /// `"1"` / `"0"`
    DigitString,
}

impl BackendEncoding {
    pub fn encode(self, on: bool) -> Value {
        match self {
            Self::MessageOnOff => json!({ "message": if on { "ON" } else { "OFF" } }),
            Self::DigitString => json!(if on { "1" } else { "0" }),
        }
    }

    /// Anything that is not a recognised "on" value decodes as off.
    /// Controller boards write `1` as a number or `true` as often as `"1"`.
    pub fn decode(self, value: &Value) -> bool {
        match self {
            Self::MessageOnOff => value.get("message").and_then(Value::as_str) == Some("ON"),
            Self::DigitString => match value {
                Value::String(s) => s == "1",
                Value::Number(n) => n.as_i64() == Some(1),
                Value::Bool(b) => *b,
                _ => false,
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_both_encodings() {
        for enc in [BackendEncoding::MessageOnOff, BackendEncoding::DigitString] {
            assert!(enc.decode(&enc.encode(true)));
            assert!(!enc.decode(&enc.encode(false)));
        }
    }

    #[test]
    fn message_encoding_shape() {
        assert_eq!(
            BackendEncoding::MessageOnOff.encode(true),
            json!({"message": "ON"})
        );
        assert_eq!(
            BackendEncoding::MessageOnOff.encode(false),
            json!({"message": "OFF"})
        );
    }

    #[test]
    fn digit_encoding_shape() {
        assert_eq!(BackendEncoding::DigitString.encode(true), json!("1"));
        assert_eq!(BackendEncoding::DigitString.encode(false), json!("0"));
    }

    #[test]
    fn digit_decoding_is_lenient() {
        let enc = BackendEncoding::DigitString;
        assert!(enc.decode(&json!(1)));
        assert!(enc.decode(&json!(true)));
        assert!(!enc.decode(&json!(0)));
        assert!(!enc.decode(&json!("ON")));
        assert!(!enc.decode(&json!(null)));
    }

    #[test]
    fn message_decoding_rejects_other_shapes() {
        let enc = BackendEncoding::MessageOnOff;
        assert!(!enc.decode(&json!("ON")));
        assert!(!enc.decode(&json!({"message": "on"})));
        assert!(!enc.decode(&json!({"state": "ON"})));
    }
}
