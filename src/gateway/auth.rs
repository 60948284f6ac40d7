use subtle::ConstantTimeEq;

/// Verify the initial WebSocket frame `{"token": "..."}`.
/// Always true when no token is configured (loopback mode).
pub fn verify_connect(msg: &str, expected: &Option<String>) -> bool {
    let token = serde_json::from_str::<serde_json::Value>(msg)
        .ok()
        .and_then(|v| v.get("token")?.as_str().map(String::from));
    token_matches(token.as_deref(), expected)
}

/// Verify an HTTP `Authorization: Bearer <token>` header value.
pub fn verify_bearer(header: Option<&str>, expected: &Option<String>) -> bool {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim);
    token_matches(token, expected)
}

fn token_matches(presented: Option<&str>, expected: &Option<String>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    presented.is_some_and(|token| {
        let (a, b) = (token.as_bytes(), expected.as_bytes());
        a.len() == b.len() && bool::from(a.ct_eq(b))
    })
}
