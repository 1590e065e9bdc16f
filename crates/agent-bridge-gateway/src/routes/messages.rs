//! Request/response bridge onto a conversation.

use std::sync::Arc;

use agent_bridge_core::InboundEvent;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{error::GatewayError, state::AppState};

/// Body of `POST /send-message`.
///
/// Both fields are strings; a body with any other type is rejected as a whole.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SendMessageRequest {
    /// Both fields, if present and non-empty.
    #[must_use]
    pub fn into_parts(self) -> Option<(String, String)> {
        let conversation_id = self.conversation_id.filter(|id| !id.is_empty())?;
        let message = self.message.filter(|text| !text.is_empty())?;
        Some((conversation_id, message))
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    /// Reply event, or `null` when the agent finished without one.
    pub response: Option<Value>,
}

/// Send one message and wait for the agent's reply.
///
/// # Errors
/// `MissingField` for an unusable body, `Bridge` when the exchange fails.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, GatewayError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected request body: {rejection}");
            return Err(GatewayError::MissingField);
        }
    };
    let (conversation_id, message) = request.into_parts().ok_or(GatewayError::MissingField)?;

    info!(%conversation_id, "Forwarding message to agent");
    let response = state
        .bridge
        .create(conversation_id.as_str())
        .send_message(&message)
        .await?;
    debug!(%conversation_id, "Agent response: {response:?}");

    Ok(Json(SendMessageResponse {
        response: response.map(InboundEvent::into_value),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(conversation_id: Option<&str>, message: Option<&str>) -> SendMessageRequest {
        SendMessageRequest {
            conversation_id: conversation_id.map(str::to_string),
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_into_parts() {
        assert_eq!(
            request(Some("c1"), Some("hi")).into_parts(),
            Some(("c1".to_string(), "hi".to_string()))
        );
        assert_eq!(request(None, Some("hi")).into_parts(), None);
        assert_eq!(request(Some("c1"), None).into_parts(), None);
        assert_eq!(request(Some(""), Some("hi")).into_parts(), None);
        assert_eq!(request(Some("c1"), Some("")).into_parts(), None);
    }

    #[test]
    fn test_non_string_fields_fail_to_deserialize() {
        let parse = serde_json::from_str::<SendMessageRequest>;
        assert!(parse(r#"{"conversationId":42,"message":"hi"}"#).is_err());
        assert!(parse(r#"{"conversationId":"c1","message":true}"#).is_err());
    }

    #[test]
    fn test_null_fields_deserialize_as_missing() {
        let request: SendMessageRequest =
            serde_json::from_str(r#"{"conversationId":null,"message":"hi"}"#).unwrap();
        assert_eq!(request.into_parts(), None);
    }
}
