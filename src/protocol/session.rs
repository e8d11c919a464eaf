use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// The identifier triple the hub needs to continue a dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub conversation_id: String,
    pub conversation_signature: String,
    pub client_id: String,
}

impl Session {
    /// Assemble a session from caller-supplied parts, if all three are present.
    #[must_use]
    pub fn from_parts(
        conversation_id: Option<&str>,
        conversation_signature: Option<&str>,
        client_id: Option<&str>,
    ) -> Option<Self> {
        let non_empty = |value: Option<&str>| value.filter(|v| !v.is_empty()).map(str::to_string);
        Some(Self {
            conversation_id: non_empty(conversation_id)?,
            conversation_signature: non_empty(conversation_signature)?,
            client_id: non_empty(client_id)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionResult {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of the session-creation endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_signature: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub result: Option<SessionResult>,
}

const UNAUTHORIZED_REQUEST: &str = "UnauthorizedRequest";

/// Turn a raw session-creation body into a [`Session`].
///
/// # Errors
///
/// Returns [`ClientError::SessionCreationFailed`] when the service rejected
/// the request or any identifier is missing. The service's own code and
/// message are surfaced when present, the raw body otherwise.
pub fn session_from_body(body: &Value) -> Result<Session, ClientError> {
    let response: SessionResponse =
        serde_json::from_value(body.clone()).unwrap_or_default();
    let result = response.result.as_ref();
    let code = result.and_then(|r| r.value.as_deref());
    let message = result
        .and_then(|r| r.message.clone())
        .unwrap_or_default();

    if code == Some(UNAUTHORIZED_REQUEST) {
        return Err(ClientError::SessionCreationFailed {
            code: UNAUTHORIZED_REQUEST.to_string(),
            message,
        });
    }

    if let Some(session) = Session::from_parts(
        response.conversation_id.as_deref(),
        response.conversation_signature.as_deref(),
        response.client_id.as_deref(),
    ) {
        return Ok(session);
    }

    match code {
        Some(code) if !code.is_empty() => Err(ClientError::SessionCreationFailed {
            code: code.to_string(),
            message,
        }),
        _ => Err(ClientError::SessionCreationFailed {
            code: "UnexpectedResponse".to_string(),
            message: serde_json::to_string_pretty(body).unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_response_yields_session() {
        let session = session_from_body(&json!({
            "conversationId": "c",
            "conversationSignature": "s",
            "clientId": "id",
            "result": {"value": "Success", "message": null}
        }))
        .unwrap();
        assert_eq!(session.conversation_id, "c");
        assert_eq!(session.conversation_signature, "s");
        assert_eq!(session.client_id, "id");
    }

    #[test]
    fn test_unauthorized_is_rejected_even_with_ids() {
        let err = session_from_body(&json!({
            "conversationId": "c",
            "conversationSignature": "s",
            "clientId": "id",
            "result": {"value": "UnauthorizedRequest", "message": "Sorry, you need to login first."}
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "UnauthorizedRequest: Sorry, you need to login first."
        );
    }

    #[test]
    fn test_missing_ids_surface_service_code() {
        let err = session_from_body(&json!({
            "conversationId": "c",
            "result": {"value": "Forbidden", "message": "Region blocked"}
        }))
        .unwrap_err();
        let ClientError::SessionCreationFailed { code, message } = err else {
            panic!("unexpected error kind");
        };
        assert_eq!(code, "Forbidden");
        assert_eq!(message, "Region blocked");
    }

    #[test]
    fn test_missing_ids_without_code_include_raw_body() {
        let err = session_from_body(&json!({"clientId": ""})).unwrap_err();
        let ClientError::SessionCreationFailed { code, message } = err else {
            panic!("unexpected error kind");
        };
        assert_eq!(code, "UnexpectedResponse");
        assert!(message.contains("clientId"));
    }

    #[test]
    fn test_from_parts_requires_all_three() {
        assert!(Session::from_parts(Some("c"), Some("s"), None).is_none());
        assert!(Session::from_parts(Some("c"), Some(""), Some("id")).is_none());
        assert!(Session::from_parts(Some("c"), Some("s"), Some("id")).is_some());
    }
}
