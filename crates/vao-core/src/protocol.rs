//! Control-plane protocol — line-delimited JSON messages
//!
//! Requests, responses, and notifications are newline-terminated JSON
//! objects, identical for both framings (UASP carries them in UDP
//! datagrams, UASP2 on a TCP stream). A request names its `action` and may
//! carry an `id`, which is echoed on the matching response so clients can
//! pair them.
//!
//! Malformed JSON or an unknown action is a *bad command*: the daemon
//! warns and stays silent, it never replies with an error object.
//!
//! ## Example
//!
//! ```rust
//! use vao_core::protocol::Request;
//!
//! let req: Request = serde_json::from_str(r#"{"action":"istart","port":9999}"#).unwrap();
//! assert!(matches!(req, Request::Istart { port: 9999, .. }));
//! ```

use crate::params::ParamValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name reported by the `version` action.
pub const PROTOCOL_NAME: &str = "VirtualAcousticOcean";

/// Streaming-protocol revision reported by the `version` action.
pub const PROTOCOL_VERSION: &str = "0.2.0";

/// A control-plane request, tagged by its `action` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    /// Identify the daemon.
    Version {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },

    /// Reset the ADC block sequence number to zero.
    Ireset {},

    /// Designate the sender as the streaming client; ADC frames go to its
    /// `port` (UDP) from now on.
    Istart { port: u16 },

    /// Forget the streaming destination.
    Istop {},

    /// Clear the DAC burst buffer.
    Oclear {},

    /// Append base64-encoded DAC samples to the burst buffer (UASP2 only;
    /// UASP carries DAC data on its binary data socket instead).
    Odata { data: String },

    /// Fire the accumulated DAC burst at `time` µs (0 or absent: now).
    Ostart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },

    /// No-op: an in-flight transmission cannot be cancelled.
    Ostop {},

    /// Read a parameter. Unknown parameters get no response.
    Get {
        param: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },

    /// Write a parameter. Unknown parameters are silently ignored.
    Set { param: String, value: ParamValue },

    /// No-op.
    Quit {},
}

/// Response to `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl VersionResponse {
    /// Build the standard response for this crate, echoing `id`.
    pub fn new(version: &str, id: Option<Value>) -> Self {
        Self {
            name: PROTOCOL_NAME.to_string(),
            version: version.to_string(),
            protocol: PROTOCOL_VERSION.to_string(),
            id,
        }
    }
}

/// Response to `get` for a known parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamResponse {
    pub param: String,
    pub value: ParamValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// Asynchronous notification (`ostart`/`ostop` events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventNotification {
    /// Event name.
    pub event: String,
    /// Event time in µs since the simulation epoch.
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_with_id() {
        let req: Request = serde_json::from_str(r#"{"action":"version","id":7}"#).unwrap();
        match req {
            Request::Version { id } => assert_eq!(id, Some(Value::from(7))),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_bare_actions() {
        for line in [
            r#"{"action":"ireset"}"#,
            r#"{"action":"istop"}"#,
            r#"{"action":"oclear"}"#,
            r#"{"action":"ostop"}"#,
            r#"{"action":"quit"}"#,
        ] {
            assert!(serde_json::from_str::<Request>(line).is_ok(), "{line}");
        }
    }

    #[test]
    fn test_parse_ostart_variants() {
        let req: Request = serde_json::from_str(r#"{"action":"ostart"}"#).unwrap();
        assert!(matches!(req, Request::Ostart { time: None, id: None }));

        let req: Request =
            serde_json::from_str(r#"{"action":"ostart","time":1000000,"id":"tx1"}"#).unwrap();
        match req {
            Request::Ostart { time, id } => {
                assert_eq!(time, Some(1_000_000));
                assert_eq!(id, Some(Value::from("tx1")));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_is_an_error() {
        assert!(serde_json::from_str::<Request>(r#"{"action":"warp"}"#).is_err());
    }

    #[test]
    fn test_set_parses_value_shapes() {
        let req: Request =
            serde_json::from_str(r#"{"action":"set","param":"igain","value":6}"#).unwrap();
        match req {
            Request::Set { param, value } => {
                assert_eq!(param, "igain");
                assert_eq!(value.as_f64(), Some(6.0));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_version_response_shape() {
        let json =
            serde_json::to_string(&VersionResponse::new("0.2.0", Some(Value::from(7)))).unwrap();
        assert!(json.contains(r#""name":"VirtualAcousticOcean""#));
        assert!(json.contains(r#""protocol":"0.2.0""#));
        assert!(json.contains(r#""id":7"#));
    }

    #[test]
    fn test_event_notification_omits_missing_id() {
        let json = serde_json::to_string(&EventNotification {
            event: "ostop".to_string(),
            time: 42,
            id: None,
        })
        .unwrap();
        assert!(!json.contains("id"));
    }
}
