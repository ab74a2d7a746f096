use serde::{Deserialize, Serialize};

/// Error payload returned by the application API on non-2xx responses.
///
/// Validation failures carry a list of messages; everything else a single one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ErrorMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorMessage {
    Single(String),
    Many(Vec<String>),
}

impl ApiErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(ErrorMessage::Single(message.into())),
            error: None,
            status_code: None,
        }
    }

    pub fn message_text(&self) -> Option<String> {
        match self.message.as_ref()? {
            ErrorMessage::Single(text) if !text.trim().is_empty() => Some(text.clone()),
            ErrorMessage::Single(_) => None,
            ErrorMessage::Many(parts) if !parts.is_empty() => Some(parts.join("; ")),
            ErrorMessage::Many(_) => None,
        }
    }
}
