mod handler;
mod session;

use std::collections::HashMap;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use pawlink_core::{auth, AppState};

pub fn gateway_router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

/// The credential is checked during the HTTP upgrade: a bad token never
/// reaches a single event handler, it is refused right here.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Response {
    let token = params
        .get("token")
        .map(String::as_str)
        .or_else(|| bearer.as_ref().map(|header| header.token()));

    let Some(token) = token else {
        return refuse(auth::AuthError::MissingCredential);
    };
    let claims = match auth::validate_token(token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(err) => return refuse(err),
    };

    ws.on_upgrade(move |socket| handler::handle_connection(socket, state, claims))
        .into_response()
}

fn refuse(err: auth::AuthError) -> Response {
    tracing::warn!(error = %err, "gateway connection refused");
    (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
}
