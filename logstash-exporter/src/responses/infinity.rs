//! Float that also accepts Logstash's `"Infinity"` string encoding.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Numeric field that Logstash may serialize as `"Infinity"` or `"-Infinity"`.
///
/// Flow metrics divide by elapsed time and report infinities as strings
/// when the denominator is zero. Any other string is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct InfinityFloat(pub f64);

impl InfinityFloat {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for InfinityFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(InfinityFloatVisitor)
    }
}

struct InfinityFloatVisitor;

impl<'de> Visitor<'de> for InfinityFloatVisitor {
    type Value = InfinityFloat;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, \"Infinity\" or \"-Infinity\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(InfinityFloat(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(InfinityFloat(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(InfinityFloat(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match v {
            "Infinity" => Ok(InfinityFloat(f64::INFINITY)),
            "-Infinity" => Ok(InfinityFloat(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

impl Serialize for InfinityFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 == f64::INFINITY {
            serializer.serialize_str("Infinity")
        } else if self.0 == f64::NEG_INFINITY {
            serializer.serialize_str("-Infinity")
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<InfinityFloat, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse("13.3").unwrap().value(), 13.3);
        assert_eq!(parse("7").unwrap().value(), 7.0);
        assert_eq!(parse("-2").unwrap().value(), -2.0);
    }

    #[test]
    fn test_infinity_strings() {
        assert_eq!(parse("\"Infinity\"").unwrap().value(), f64::INFINITY);
        assert_eq!(parse("\"-Infinity\"").unwrap().value(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_rejects_other_strings() {
        assert!(parse("\"-infinity\"").is_err());
        assert!(parse("\"--Infinity\"").is_err());
        assert!(parse("\"13.3\"").is_err());
        assert!(parse("\"\"").is_err());
    }

    #[test]
    fn test_rejects_non_scalars() {
        assert!(parse("{}").is_err());
        assert!(parse("[1]").is_err());
        assert!(parse("true").is_err());
        assert!(parse("null").is_err());
    }

    #[test]
    fn test_serialize_keeps_infinity_strings() {
        assert_eq!(
            serde_json::to_string(&InfinityFloat(f64::INFINITY)).unwrap(),
            "\"Infinity\""
        );
        assert_eq!(
            serde_json::to_string(&InfinityFloat(f64::NEG_INFINITY)).unwrap(),
            "\"-Infinity\""
        );
        assert_eq!(serde_json::to_string(&InfinityFloat(1.5)).unwrap(), "1.5");
    }
}
