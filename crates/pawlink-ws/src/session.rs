use pawlink_core::auth::Claims;
use pawlink_models::ids::ConnectionId;

/// Authenticated context for one live connection. Immutable for the
/// connection's lifetime — re-authentication means a new connection.
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub role: String,
    pub rescue_id: Option<String>,
}

impl Session {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id: claims.user_id,
            role: claims.role,
            rescue_id: claims.rescue_id,
        }
    }
}
