use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Profile row for a signed-in user. Identity itself is owned by the external
/// identity provider; this record is upserted on each sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountProfile {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Account {
    /// Merge a sign-in into an existing row (or create one), stamping `last_login`.
    pub fn sign_in(existing: Option<Account>, id: &str, profile: AccountProfile) -> Result<Self> {
        let email = profile.email.trim().to_string();
        if !email.contains('@') {
            return Err(FlowError::Validation(format!("invalid email: {email}")));
        }
        let name = profile
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let now = Utc::now();
        Ok(match existing {
            Some(mut acct) => {
                acct.email = email;
                acct.name = name;
                acct.last_login = Some(now);
                acct.updated_at = now;
                acct
            }
            None => Account {
                id: id.to_string(),
                email,
                name,
                last_login: Some(now),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_defaults_name_from_email() {
        let acct = Account::sign_in(
            None,
            "u1",
            AccountProfile {
                email: "ada@example.com".into(),
                name: None,
            },
        )
        .unwrap();
        assert_eq!(acct.name, "ada");
        assert!(acct.last_login.is_some());
    }

    #[test]
    fn sign_in_keeps_created_at_of_existing_row() {
        let first = Account::sign_in(
            None,
            "u1",
            AccountProfile {
                email: "ada@example.com".into(),
                name: Some("Ada".into()),
            },
        )
        .unwrap();
        let again = Account::sign_in(
            Some(first.clone()),
            "u1",
            AccountProfile {
                email: "ada@example.org".into(),
                name: Some("Ada L.".into()),
            },
        )
        .unwrap();
        assert_eq!(again.created_at, first.created_at);
        assert_eq!(again.email, "ada@example.org");
    }

    #[test]
    fn sign_in_rejects_malformed_email() {
        assert!(Account::sign_in(None, "u1", AccountProfile::default()).is_err());
    }
}
