use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to join an event (or log back in with the same nickname)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JoinRequest {
    #[validate(length(min = 1, max = 20))]
    pub code: String,
    #[validate(length(min = 1, max = 30))]
    pub nickname: String,
    /// "M" or "F"
    #[validate(length(equal = 1))]
    pub gender: String,
    #[validate(length(min = 4, max = 12))]
    pub pin: String,
}

impl JoinRequest {
    /// Trim surrounding whitespace before validation, as clients send raw form input.
    pub fn normalized(mut self) -> Self {
        self.code = self.code.trim().to_string();
        self.nickname = self.nickname.trim().to_string();
        self.gender = self.gender.trim().to_ascii_uppercase();
        self.pin = self.pin.trim().to_string();
        self
    }
}

/// Request to send a signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    #[serde(alias = "to_id", rename = "toId")]
    pub to_id: i64,
}

/// Request to send the single second-phase message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    #[serde(alias = "to_id", rename = "toId")]
    pub to_id: i64,
    #[serde(default)]
    pub text: String,
}

/// Host request to create an event
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 20))]
    pub code: String,
}

impl CreateEventRequest {
    pub fn normalized(mut self) -> Self {
        self.code = self.code.trim().to_string();
        self
    }
}

/// Query string addressing an event by code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCodeQuery {
    pub code: String,
    /// Host key, for clients that cannot set headers (EventSource)
    #[serde(default)]
    pub key: Option<String>,
}

/// Query string carrying a participant token, for EventSource clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_request_normalization() {
        let req = JoinRequest {
            code: " PARTY ".to_string(),
            nickname: " neo ".to_string(),
            gender: "f".to_string(),
            pin: " 1234 ".to_string(),
        }
        .normalized();

        assert_eq!(req.code, "PARTY");
        assert_eq!(req.nickname, "neo");
        assert_eq!(req.gender, "F");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_join_request_rejects_short_pin() {
        let req = JoinRequest {
            code: "PARTY".to_string(),
            nickname: "neo".to_string(),
            gender: "M".to_string(),
            pin: "12".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_blank_event_code_is_invalid() {
        let req = CreateEventRequest { code: "   ".to_string() }.normalized();
        assert_eq!(req.code, "");
        assert!(req.validate().is_err());

        let req = CreateEventRequest { code: " PARTY ".to_string() }.normalized();
        assert_eq!(req.code, "PARTY");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_signal_request_accepts_snake_case() {
        let req: SignalRequest = serde_json::from_str(r#"{"to_id": 5}"#).unwrap();
        assert_eq!(req.to_id, 5);
    }
}
