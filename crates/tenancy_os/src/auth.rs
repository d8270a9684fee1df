#![forbid(unsafe_code)]

use std::sync::{PoisonError, RwLock};

use tenancy_kernel_contracts::identity::AuthenticatedUser;

/// Source of the signed-in account. The hosted backend owns authentication;
/// the reconciler only asks who is signed in right now.
pub trait AuthContext: Send + Sync + std::fmt::Debug {
    fn current_user(&self) -> Option<AuthenticatedUser>;
}

/// Auth session held in process, updated on sign-in/sign-out.
#[derive(Debug, Default)]
pub struct SessionAuthContext {
    user: RwLock<Option<AuthenticatedUser>>,
}

impl SessionAuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthenticatedUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn sign_in(&self, user: AuthenticatedUser) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl AuthContext for SessionAuthContext {
    fn current_user(&self) -> Option<AuthenticatedUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
