//! API-key gate
//!
//! Runs as route middleware on every protected endpoint, before extractors,
//! so an unauthenticated request never has its body read, decoded or sent to
//! the model.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use food_core::Error;
use tracing::warn;

use crate::error::ApiError;
use crate::state::SharedState;

/// Reject requests without the configured key
pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let auth = &state.config.auth;
    let provided = request
        .headers()
        .get(auth.header_name.as_str())
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if constant_time_compare(key, &auth.api_key) => next.run(request).await,
        Some(_) => {
            warn!("Rejected {} {}: wrong API key", request.method(), request.uri().path());
            ApiError(Error::Unauthorized).into_response()
        }
        None => {
            warn!("Rejected {} {}: missing API key", request.method(), request.uri().path());
            ApiError(Error::Unauthorized).into_response()
        }
    }
}

/// Equality check whose running time does not depend on where the inputs differ
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("TEMPE12345", "TEMPE12345"));
        assert!(!constant_time_compare("TEMPE12345", "TEMPE12346"));
        assert!(!constant_time_compare("short", "longer key"));
        assert!(!constant_time_compare("", "key"));
    }
}
