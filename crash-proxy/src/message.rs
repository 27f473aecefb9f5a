//! Crash report payload as submitted by the crash app.

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// The JSON document posted to an ingestion route.
///
/// Only a JSON object is accepted. Missing and `null` fields decode to empty
/// strings; unknown fields are ignored and a repeated field keeps its last
/// value. The decoded value is only inspected: the original request bytes are
/// what gets forwarded upstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrashReportMessage {
    pub date: String,
    /// Wire name `k2_log`
    pub log: String,
    pub failed_task: String,
}

impl CrashReportMessage {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn has_date(&self) -> bool {
        !self.date.is_empty()
    }
}

impl<'de> Deserialize<'de> for CrashReportMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(CrashReportVisitor)
    }
}

struct CrashReportVisitor;

impl<'de> Visitor<'de> for CrashReportVisitor {
    type Value = CrashReportMessage;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a crash report object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut message = CrashReportMessage::default();
        while let Some(key) = map.next_key::<String>()? {
            let field = match key.as_str() {
                "date" => &mut message.date,
                "k2_log" => &mut message.log,
                "failed_task" => &mut message.failed_task,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                    continue;
                }
            };
            *field = map.next_value::<Option<String>>()?.unwrap_or_default();
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_message() {
        let body = br#"{
            "date": "2017-09-26T15:56:49.012Z",
            "k2_log": "PLAY [all] TASK [setup]",
            "failed_task": "roles/kraken.readiness : Get all nodes"
        }"#;

        let message = CrashReportMessage::from_slice(body).unwrap();
        assert_eq!(message.date, "2017-09-26T15:56:49.012Z");
        assert_eq!(message.log, "PLAY [all] TASK [setup]");
        assert_eq!(message.failed_task, "roles/kraken.readiness : Get all nodes");
        assert!(message.has_date());
    }

    #[test]
    fn test_missing_and_null_fields_are_empty() {
        let message = CrashReportMessage::from_slice(br#"{"date": null, "extra": 1}"#).unwrap();
        assert_eq!(message, CrashReportMessage::default());
        assert!(!message.has_date());
    }

    #[test]
    fn test_decode_errors() {
        assert!(CrashReportMessage::from_slice(b"").is_err());
        assert!(CrashReportMessage::from_slice(b"{not json").is_err());
        assert!(CrashReportMessage::from_slice(br#"{"k2_log": 42}"#).is_err());
        assert!(CrashReportMessage::from_slice(br#"{} trailing"#).is_err());
    }

    #[test]
    fn test_only_objects_decode() {
        let bodies: [&[u8]; 4] = [
            br#"[null, "PLAY [all]", "a : b"]"#,
            b"[]",
            b"\"report\"",
            b"42",
        ];
        for body in bodies {
            assert!(CrashReportMessage::from_slice(body).is_err());
        }
    }

    #[test]
    fn test_repeated_field_keeps_last() {
        let message =
            CrashReportMessage::from_slice(br#"{"failed_task": "a : b", "failed_task": "c : d"}"#)
                .unwrap();
        assert_eq!(message.failed_task, "c : d");
    }
}
