//! Core types shared across the gateway

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::GatewayError;

/// Opaque call identifier, caller-supplied or generated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    /// Generate a fresh random call id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Use the supplied id, or generate one when it is missing or blank
    pub fn from_request(requested: Option<&str>) -> Self {
        match requested.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Kind of SDP carried by a [`SessionDescription`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    #[default]
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// An SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionDescription {
    #[serde(default)]
    pub sdp: String,
    #[serde(rename = "type", default)]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sdp.trim().is_empty()
    }
}

/// External decision verb for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Reject,
    Terminate,
    Hangup,
}

impl Action {
    /// Administrative actions close the call without negotiation
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Action::Accept)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Reject => "reject",
            Action::Terminate => "terminate",
            Action::Hangup => "hangup",
        }
    }
}

impl FromStr for Action {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(Action::Accept),
            "reject" => Ok(Action::Reject),
            "terminate" => Ok(Action::Terminate),
            "hangup" => Ok(Action::Hangup),
            other => Err(GatewayError::validation(format!(
                "unsupported action: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision handed from the dispatcher to a session's waiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    /// Present only for [`Action::Accept`]
    pub remote_description: Option<SessionDescription>,
}

impl Decision {
    pub fn accept(remote_description: SessionDescription) -> Self {
        Self {
            action: Action::Accept,
            remote_description: Some(remote_description),
        }
    }

    pub fn close(action: Action) -> Self {
        Self {
            action,
            remote_description: None,
        }
    }
}

/// Which side produced the first SDP of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    /// The gateway produced the offer and waits for a decision
    Offer,
    /// The remote side offered and the gateway answered
    Answer,
}

/// Connectivity reported by the transport engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    #[default]
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// Disconnected, failed or closed
    pub fn is_down(&self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Failed | ConnectivityState::Closed
        )
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
