#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "user_id",
                reason: "must not be empty",
            });
        }
        if id.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "user_id",
                reason: "must be <= 128 chars",
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// The signed-in account, as reported by the hosted backend's auth session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub email: String,
}

impl AuthenticatedUser {
    pub fn new(id: UserId, email: impl Into<String>) -> Result<Self, ContractViolation> {
        let user = Self {
            id,
            email: email.into(),
        };
        user.validate()?;
        Ok(user)
    }
}

impl Validate for AuthenticatedUser {
    fn validate(&self) -> Result<(), ContractViolation> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "authenticated_user.email",
                reason: "must not be empty",
            });
        }
        if email.len() > 320 {
            return Err(ContractViolation::InvalidValue {
                field: "authenticated_user.email",
                reason: "must be <= 320 chars",
            });
        }
        if !email.contains('@') {
            return Err(ContractViolation::InvalidValue {
                field: "authenticated_user.email",
                reason: "must contain '@'",
            });
        }
        Ok(())
    }
}
