//! Users, stored provider credentials and credit arithmetic.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minutes of credit consumed by a video of `duration_seconds`.
///
/// Any started minute is billed as a whole minute.
pub fn credit_minutes(duration_seconds: u64) -> i64 {
    i64::try_from(duration_seconds.div_ceil(60)).unwrap_or(i64::MAX)
}

/// OAuth credentials used to upload captions on the user's behalf.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Credentials {
    #[serde(default, alias = "token", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
}

impl Credentials {
    /// A refresh-token exchange is possible.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() {
                "<redacted>"
            } else {
                "<none>"
            }
        }

        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Owner of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    pub id: i64,
    pub name: String,
    /// Remaining credit in minutes
    pub credit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl User {
    pub fn can_afford(&self, minutes: i64) -> bool {
        minutes <= self.credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_minutes_rounds_up() {
        assert_eq!(credit_minutes(0), 0);
        assert_eq!(credit_minutes(1), 1);
        assert_eq!(credit_minutes(60), 1);
        assert_eq!(credit_minutes(61), 2);
        assert_eq!(credit_minutes(361), 7);
    }

    #[test]
    fn test_can_afford() {
        let user = User {
            id: 1,
            name: "ada".into(),
            credit: 5,
            credentials: None,
        };
        assert!(user.can_afford(5));
        assert!(!user.can_afford(credit_minutes(361)));
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            access_token: Some("ya29.secret".into()),
            refresh_token: Some("1//refresh".into()),
            client_id: Some("client".into()),
            client_secret: Some("shh".into()),
            token_uri: None,
        };
        let rendered = format!("{creds:?}");

        assert!(!rendered.contains("ya29.secret"));
        assert!(!rendered.contains("shh"));
        assert!(rendered.contains("client"));
        assert!(creds.can_refresh());
    }

    #[test]
    fn test_credentials_accept_token_alias() {
        let creds: Credentials = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(creds.access_token.as_deref(), Some("abc"));
        assert!(!creds.can_refresh());
    }
}
