//! Unwrapping API responses to their payload
//!
//! The API wraps some payloads in an envelope:
//!
//! ```json
//! { "success": false, "error": { "message": "Name is taken", "code": "Lottery:001" } }
//! ```
//!
//! A `success: false` envelope is a failure even when the HTTP status is 2xx.
//! A `success: true` envelope yields its `data` field. Any other body is the
//! payload itself.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

const DEFAULT_BUSINESS_MESSAGE: &str = "request failed";

/// Turns a raw response into its payload or a normalized error
pub async fn unwrap_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await.map_err(ApiError::Body)?;

    if !status.is_success() {
        let message = serde_json::from_slice::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(error_field("message"))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or(DEFAULT_BUSINESS_MESSAGE)
                    .to_owned()
            });

        tracing::debug!(status = status.as_u16(), %message, "request failed");
        return Err(ApiError::Status { status, message });
    }

    let value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(ApiError::Decode)?
    };

    let payload = unwrap_envelope(value)?;
    serde_json::from_value(payload).map_err(ApiError::Decode)
}

/// Extracts the payload from a decoded body
///
/// Returns [`ApiError::Business`] for an envelope with `success: false`.
pub fn unwrap_envelope(value: Value) -> Result<Value, ApiError> {
    let success = value.get("success").and_then(Value::as_bool);
    match (success, value) {
        (Some(false), value) => {
            let message = error_field("message")(&value)
                .unwrap_or_else(|| DEFAULT_BUSINESS_MESSAGE.to_owned());
            let code = error_field("code")(&value);
            tracing::debug!(%message, ?code, "server reported a business failure");
            Err(ApiError::Business { message, code })
        }
        (Some(true), Value::Object(mut map)) => Ok(map.remove("data").unwrap_or(Value::Null)),
        (_, value) => Ok(value),
    }
}

fn error_field(name: &'static str) -> impl Fn(&Value) -> Option<String> {
    move |value| {
        value
            .get("error")?
            .get(name)?
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    mod envelopes {
        use super::*;

        #[test]
        fn plain_bodies_are_the_payload() {
            let body = json!({ "totalCount": 1, "items": [{ "id": 7 }] });
            assert_eq!(unwrap_envelope(body.clone()).unwrap(), body);
        }

        #[test]
        fn successful_envelopes_yield_their_data() {
            let body = json!({ "success": true, "data": { "id": 7 } });
            assert_eq!(unwrap_envelope(body).unwrap(), json!({ "id": 7 }));
        }

        #[test]
        fn successful_envelopes_without_data_yield_null() {
            let body = json!({ "success": true });
            assert_eq!(unwrap_envelope(body).unwrap(), Value::Null);
        }

        #[test]
        fn failed_envelopes_are_business_errors() {
            let body = json!({
                "success": false,
                "error": { "message": "Name is taken", "code": "Lottery:001" }
            });

            match unwrap_envelope(body).unwrap_err() {
                ApiError::Business { message, code } => {
                    assert_eq!(message, "Name is taken");
                    assert_eq!(code.as_deref(), Some("Lottery:001"));
                }
                other => panic!("expected a business error, got {:?}", other),
            }
        }

        #[test]
        fn failed_envelopes_without_a_message_get_a_default() {
            let body = json!({ "success": false });

            match unwrap_envelope(body).unwrap_err() {
                ApiError::Business { message, code } => {
                    assert_eq!(message, "request failed");
                    assert_eq!(code, None);
                }
                other => panic!("expected a business error, got {:?}", other),
            }
        }

        #[test]
        fn non_boolean_success_fields_are_not_envelopes() {
            let body = json!({ "success": "false", "value": 1 });
            assert_eq!(unwrap_envelope(body.clone()).unwrap(), body);
        }
    }

    mod responses {
        use reqwest::StatusCode;

        use super::*;

        fn response(status: u16, body: &'static str) -> reqwest::Response {
            http::Response::builder()
                .status(status)
                .body(body)
                .unwrap()
                .into()
        }

        #[tokio::test]
        async fn empty_bodies_decode_as_null() {
            let value: Option<u32> = unwrap_response(response(204, "")).await.unwrap();
            assert_eq!(value, None);
        }

        #[tokio::test]
        async fn payloads_are_decoded_into_the_requested_type() {
            let value: Vec<u32> = unwrap_response(response(200, r#"{"success":true,"data":[1,2]}"#))
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2]);
        }

        #[tokio::test]
        async fn error_statuses_carry_the_server_message() {
            let error = unwrap_response::<Value>(response(
                403,
                r#"{"error":{"message":"Not allowed to edit"}}"#,
            ))
            .await
            .unwrap_err();

            match error {
                ApiError::Status { status, message } => {
                    assert_eq!(status, StatusCode::FORBIDDEN);
                    assert_eq!(message, "Not allowed to edit");
                }
                other => panic!("expected a status error, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn error_statuses_without_a_message_use_the_reason() {
            let error = unwrap_response::<Value>(response(401, "<html>nope</html>"))
                .await
                .unwrap_err();

            assert!(error.is_unauthorized());
            assert!(!error.is_cancelled());
            assert_eq!(
                error.to_string(),
                "request failed with status 401 Unauthorized: Unauthorized"
            );
        }

        #[tokio::test]
        async fn malformed_success_bodies_are_decode_errors() {
            let error = unwrap_response::<Value>(response(200, "{not json"))
                .await
                .unwrap_err();
            assert!(matches!(error, ApiError::Decode(_)));
        }
    }
}
