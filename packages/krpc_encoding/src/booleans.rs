//! Bencode has no boolean type; BEP-5 flags like `implied_port` and the
//! BEP-43 `ro` marker are encoded as the integers `0`/`1`. This module
//! bridges that to `bool` for serde.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let as_int: i32 = if *value { 1 } else { 0 };
    as_int.serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let as_int = i64::deserialize(deserializer)?;
    Ok(as_int != 0)
}

pub fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_derive::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Flagged {
        #[serde(with = "super")]
        flag: bool,
    }

    #[test]
    fn round_trips_through_bencode_integers() {
        let value = Flagged { flag: true };
        let encoded = serde_bencode::ser::to_bytes(&value).unwrap();
        assert_eq!(encoded, b"d4:flagi1ee");
        let decoded: Flagged = serde_bencode::de::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
