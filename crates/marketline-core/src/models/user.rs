use serde::{Deserialize, Serialize};

/// Account kind reported by the auth API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum UserType {
    Agent,
    #[default]
    Customer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserStatus {
    pub user_type: UserType,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub activated: bool,
}

/// Identity record of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
}

impl User {
    /// Name for display, falling back to the email address
    pub fn display_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => self.email.clone(),
        }
    }

    pub fn is_agent(&self) -> bool {
        self.status.user_type == UserType::Agent
    }
}

/// Location payload attached to every signup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Location {
    pub country: String,
    pub city: String,
    pub address: String,
}

/// Profile submitted when creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub user_type: UserType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_from_api() {
        let json = r#"{
            "id": "u-42",
            "email": "ada@example.com",
            "firstName": "Ada",
            "status": { "userType": "agent", "emailVerified": true, "activated": false }
        }"#;
        let user: User = serde_json::from_str(json).expect("Failed to parse user JSON");

        assert_eq!(user.id, "u-42");
        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert_eq!(user.last_name, None);
        assert!(user.is_agent());
        assert!(user.status.email_verified);
        assert!(!user.status.activated);
    }

    #[test]
    fn test_parse_user_without_status() {
        let json = r#"{"id":"7","email":"bo@example.com"}"#;
        let user: User = serde_json::from_str(json).expect("Failed to parse user JSON");
        assert_eq!(user.status.user_type, UserType::Customer);
        assert!(!user.status.email_verified);
    }

    #[test]
    fn test_display_name() {
        let mut user = User {
            id: "1".to_string(),
            email: "cy@example.com".to_string(),
            first_name: None,
            last_name: None,
            status: UserStatus::default(),
        };
        assert_eq!(user.display_name(), "cy@example.com");

        user.first_name = Some("Cy".to_string());
        assert_eq!(user.display_name(), "Cy");

        user.last_name = Some("Young".to_string());
        assert_eq!(user.display_name(), "Cy Young");
    }

    #[test]
    fn test_register_profile_serializes_camel_case() {
        let profile = RegisterProfile {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            password: "difference-engine".to_string(),
            phone: None,
            user_type: UserType::Agent,
        };
        let value = serde_json::to_value(&profile).expect("serialize profile");
        assert_eq!(value["firstName"], "Ada");
        assert_eq!(value["userType"], "agent");
        assert!(value.get("phone").is_none());
    }
}
