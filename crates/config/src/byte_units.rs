// SPDX-License-Identifier: Apache-2.0

//! Support for byte units like "KB / KiB", "MB / MiB" in option files.

use byte_unit::Byte;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Value {
    Number(u64),
    String(String),
}

/// Deserialize a byte size that can be specified either as a number (in
/// bytes) or as a string with units (e.g. "1 KB", "2 MiB").
pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(value) => Ok(value),
        Value::String(text) => {
            let parsed: Byte = text.parse().map_err(DeError::custom)?;
            Ok(parsed.as_u64())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::deserialize;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "deserialize")]
        value: u64,
    }

    fn de_yaml(input: &str) -> Result<Holder, serde_yaml::Error> {
        serde_yaml::from_str::<Holder>(input)
    }

    #[test]
    fn parses_number_as_bytes() {
        let cfg = de_yaml("value: 1024").expect("should parse numeric bytes");
        assert_eq!(cfg.value, 1024);
    }

    #[test]
    fn parses_string_with_iec_units() {
        let cfg = de_yaml("value: 2 MiB").expect("should parse 2 MiB");
        assert_eq!(cfg.value, 2 * 1024 * 1024);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(de_yaml("value: two mebibytes").is_err());
    }
}
