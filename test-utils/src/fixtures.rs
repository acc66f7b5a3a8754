//! Vault response fixtures.
//!
//! JSON bodies shaped like real Vault answers, for mocks and wiremock.

use serde_json::{Value, json};

/// Answer of `auth/token/lookup-self`.
#[must_use]
pub fn token_lookup(ttl: u64, renewable: bool) -> Value {
    json!({
        "request_id": "5c8f5a6e-lookup",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": {
            "accessor": "8609694a-cdbc-db9b-d345-e782dbb562ed",
            "display_name": "token-pipeline",
            "policies": ["default", "pipeline"],
            "ttl": ttl,
            "renewable": renewable
        },
        "auth": null
    })
}

/// Answer of a successful login or `auth/token/renew-self`.
#[must_use]
pub fn auth_response(client_token: &str, lease_duration: u64) -> Value {
    json!({
        "request_id": "6d9e0b1c-auth",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": null,
        "auth": {
            "client_token": client_token,
            "accessor": "0e9e354a-520f-df04-6867-ee81cae3d42d",
            "policies": ["default", "pipeline"],
            "lease_duration": lease_duration,
            "renewable": true
        }
    })
}

/// KV version 1 secret.
#[must_use]
pub fn kv1_secret(data: &Value) -> Value {
    json!({
        "request_id": "7a0f1c2d-kv1",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 2_764_800,
        "data": data,
        "auth": null
    })
}

/// KV version 2 secret.
#[must_use]
pub fn kv2_secret(data: &Value, version: u64) -> Value {
    json!({
        "request_id": "8b1a2d3e-kv2",
        "lease_id": "",
        "renewable": false,
        "lease_duration": 0,
        "data": {
            "data": data,
            "metadata": {
                "created_time": "2024-01-15T10:30:00.000000Z",
                "deletion_time": "",
                "destroyed": false,
                "version": version
            }
        },
        "auth": null
    })
}

/// Dynamic database credentials carrying a lease.
#[must_use]
pub fn dynamic_secret(lease_id: &str, lease_duration: u64) -> Value {
    json!({
        "request_id": "9c2b3e4f-dyn",
        "lease_id": lease_id,
        "renewable": true,
        "lease_duration": lease_duration,
        "data": {
            "username": "v-pipeline-ro-x8Gk2",
            "password": "A1a-generated-password"
        },
        "auth": null
    })
}

/// Vault error body.
#[must_use]
pub fn errors(messages: &[&str]) -> Value {
    json!({ "errors": messages })
}

/// Error body of a 403 answer.
#[must_use]
pub fn permission_denied() -> Value {
    errors(&["permission denied"])
}

/// Error body of a 404 answer.
#[must_use]
pub fn not_found() -> Value {
    errors(&[])
}
