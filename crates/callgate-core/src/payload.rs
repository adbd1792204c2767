//! Request, response and event payloads
//!
//! Field names follow the call-control API the gateway fronts, so payloads
//! round-trip unchanged through callers that already speak it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MetadataConfig;
use crate::errors::{GatewayError, Result};
use crate::types::{CallId, SessionDescription};

/// `POST /load/offer`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl OfferRequest {
    /// Callback URL, ignoring blank values
    pub fn callback_url(&self) -> Option<&str> {
        non_blank(self.callback_url.as_deref())
    }
}

/// `POST /load/calls`: the remote side offered and wants an answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub session: SessionDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biz_opaque_callback_data: Option<String>,
}

impl AnswerRequest {
    pub fn validate(&self) -> Result<()> {
        if self.action != "connect" {
            return Err(GatewayError::validation(format!(
                "action must be \"connect\", got {:?}",
                self.action
            )));
        }
        if self.session.is_empty() {
            return Err(GatewayError::validation("session.sdp must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub call_id: CallId,
    pub answer: SessionDescription,
}

/// `POST /load/action`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_product: Option<String>,
}

impl ActionRequest {
    /// Remote SDP carried by an accept.
    ///
    /// Looks at `connection.webrtc.sdp` first, then `session.sdp`. A
    /// `connection.webrtc.sdp` that is itself a JSON `{"type","sdp"}` document
    /// is unwrapped to its inner SDP.
    pub fn remote_sdp(&self) -> Option<String> {
        let from_connection = self
            .connection
            .as_ref()
            .and_then(|c| c.get("webrtc"))
            .and_then(|w| w.get("sdp"))
            .and_then(Value::as_str)
            .and_then(|raw| non_blank(Some(raw)))
            .and_then(unwrap_encoded_sdp);

        from_connection.or_else(|| {
            self.session
                .as_ref()
                .and_then(|s| s.get("sdp"))
                .and_then(Value::as_str)
                .and_then(|raw| non_blank(Some(raw)))
                .map(str::to_string)
        })
    }
}

fn unwrap_encoded_sdp(raw: &str) -> Option<String> {
    if raw.trim_start().starts_with('{') {
        if let Ok(desc) = serde_json::from_str::<SessionDescription>(raw) {
            return (!desc.is_empty()).then_some(desc.sdp);
        }
    }
    Some(raw.to_string())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: String,
    pub call_id: String,
    pub action: String,
}

/// Call event delivered to the callback URL and returned by the offer endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub object: String,
    pub entry: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeValue {
    pub messaging_product: String,
    pub calls: Vec<CallEvent>,
    pub metadata: Metadata,
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    pub id: String,
    pub from: String,
    pub to: String,
    pub event: String,
    pub timestamp: String,
    pub direction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub connection: CallConnection,
    pub session: CallSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConnection {
    pub webrtc: WebRtcConnection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebRtcConnection {
    /// JSON-encoded `{"type","sdp"}` document
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub sdp: String,
    pub sdp_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub profile: Profile,
    pub wa_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
}

impl Event {
    /// Build the `connect` event for a freshly generated offer
    pub fn connect(
        call_id: &CallId,
        from: &str,
        to: &str,
        offer: &SessionDescription,
        metadata: &MetadataConfig,
    ) -> Self {
        let encoded = serde_json::json!({
            "type": offer.sdp_type,
            "sdp": offer.sdp,
        })
        .to_string();

        let call = CallEvent {
            id: call_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            event: "connect".to_string(),
            timestamp: chrono::Utc::now().timestamp().to_string(),
            direction: "USER_INITIATED".to_string(),
            status: None,
            connection: CallConnection {
                webrtc: WebRtcConnection { sdp: encoded },
            },
            session: CallSession {
                sdp: offer.sdp.clone(),
                sdp_type: offer.sdp_type.to_string(),
            },
        };

        Self {
            object: metadata.object.clone(),
            entry: vec![Entry {
                id: metadata.business_account_id.clone(),
                changes: vec![Change {
                    value: ChangeValue {
                        messaging_product: metadata.messaging_product.clone(),
                        calls: vec![call],
                        metadata: Metadata {
                            display_phone_number: metadata.display_phone_number.clone(),
                            phone_number_id: metadata.phone_number_id.clone(),
                        },
                        contacts: vec![Contact {
                            profile: Profile {
                                name: metadata.contact_name.clone(),
                            },
                            wa_id: metadata.contact_wa_id.clone(),
                        }],
                    },
                    field: "calls".to_string(),
                }],
            }],
        }
    }

    /// Id of the first call in the event
    pub fn call_id(&self) -> Option<&str> {
        self.calls().next().map(|c| c.id.as_str())
    }

    /// Every call carried by the event
    pub fn calls(&self) -> impl Iterator<Item = &CallEvent> {
        self.entry
            .iter()
            .flat_map(|e| e.changes.iter())
            .flat_map(|c| c.value.calls.iter())
    }
}
