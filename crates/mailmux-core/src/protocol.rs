//! Newline-delimited JSON envelope.
//!
//! Each request line is `{"module", "action", "params"}`; each response line
//! is `{"success", "data"?, "error"?}` with exactly one of `data`/`error`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pool::Handle;

/// One request line.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Request {
    /// `imap` or `smtp`.
    pub module: String,
    /// Action name within the module.
    pub action: String,
    /// Action-specific parameters.
    #[serde(default)]
    pub params: Value,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Response {
    /// Whether the action succeeded.
    pub success: bool,
    /// Result payload. Present (possibly `null`) on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error description. Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Builds a success envelope.
    #[must_use]
    pub const fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Builds a failure envelope carrying `error`'s message.
    #[must_use]
    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Decodes `params` for `action`.
pub(crate) fn decode<T: DeserializeOwned>(action: &str, params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|source| Error::InvalidParams {
        action: action.to_string(),
        source,
    })
}

/// Parameters naming only a handle.
#[derive(Debug, Deserialize)]
pub(crate) struct HandleParams {
    pub handle: Handle,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SelectFolderParams {
    pub handle: Handle,
    pub folder: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchParams {
    pub handle: Handle,
    #[serde(default)]
    pub highest_uid: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FetchMessagesParams {
    pub handle: Handle,
    #[serde(default)]
    pub uids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FetchMessageParams {
    pub handle: Handle,
    pub uid: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SetFlagsParams {
    pub handle: Handle,
    pub uid: u32,
    pub flags: Vec<String>,
    pub add: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CopyParams {
    pub handle: Handle,
    pub uid: u32,
    pub dest_folder: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendParams {
    pub handle: Handle,
    pub from: String,
    pub to: Vec<String>,
    pub message_b64: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_without_params() {
        let request: Request =
            serde_json::from_str(r#"{"module":"imap","action":"noop"}"#).unwrap();
        assert_eq!(request.params, Value::Null);
    }

    #[test]
    fn test_success_with_null_data_keeps_key() {
        let line = serde_json::to_string(&Response::success(Value::Null)).unwrap();
        assert_eq!(line, r#"{"success":true,"data":null}"#);
    }

    #[test]
    fn test_failure_has_no_data() {
        let line = serde_json::to_string(&Response::failure(&Error::UnknownModule(
            "pop3".into(),
        )))
        .unwrap();
        assert_eq!(line, r#"{"success":false,"error":"unknown module: pop3"}"#);
    }

    #[test]
    fn test_decode_reports_action() {
        let err = decode::<SetFlagsParams>("imap.set_flags", json!({"handle": 1, "uid": 2}))
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid params for imap.set_flags: "));
    }

    #[test]
    fn test_select_defaults_read_write() {
        let params: SelectFolderParams =
            decode("imap.select_folder", json!({"handle": 3, "folder": "INBOX"})).unwrap();
        assert!(!params.read_only);
        assert_eq!(params.handle, Handle::new(3));
    }
}
