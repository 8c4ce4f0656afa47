use std::sync::Arc;

use orgguard_auth::SessionClaims;

/// Session of the current request.
///
/// Always present on protected routes; `claims()` is `None` when the request
/// carried no valid bearer token, and the guard turns that into a 401.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    claims: Option<Arc<SessionClaims>>,
}

impl SessionContext {
    pub fn new(claims: Option<SessionClaims>) -> Self {
        Self {
            claims: claims.map(Arc::new),
        }
    }

    pub fn claims(&self) -> Option<&SessionClaims> {
        self.claims.as_deref()
    }
}
