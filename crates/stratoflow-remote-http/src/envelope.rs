//! Response envelope parsing and error classification
//!
//! Every response body looks like
//!
//! ```text
//! {"Response": {"RequestId": "...", "Error": {"Code": "...", "Message": "..."}, ...fields}}
//! ```
//!
//! with `Error` present only on failure.

use serde::Deserialize;
use stratoflow_engine::{ErrorClass, RemoteError, ResponsePayload};

const RETRYABLE_CODES: [&str; 5] = [
    "RequestLimitExceeded",
    "InternalError",
    "ResourceInUse",
    "ResourceUnavailable",
    "FailedOperation.Busy",
];

const NOT_FOUND_CODES: [&str; 2] = ["ResourceNotFound", "InvalidParameter.NotFound"];

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: ResponsePayload,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// Classify a failure by provider error code, falling back to HTTP status
pub fn classify(status: u16, code: Option<&str>) -> ErrorClass {
    if let Some(code) = code {
        if NOT_FOUND_CODES.iter().any(|p| code.starts_with(p)) {
            return ErrorClass::NotFound;
        }
        if RETRYABLE_CODES.iter().any(|p| code.starts_with(p)) {
            return ErrorClass::Retryable;
        }
    }
    match status {
        404 => ErrorClass::NotFound,
        429 => ErrorClass::Retryable,
        s if s >= 500 => ErrorClass::Retryable,
        _ => ErrorClass::Fatal,
    }
}

fn remote_error(class: ErrorClass, message: String) -> RemoteError {
    match class {
        ErrorClass::Retryable => RemoteError::retryable(message),
        ErrorClass::Fatal => RemoteError::fatal(message),
        ErrorClass::NotFound => RemoteError::not_found(message),
    }
}

/// Turn an HTTP status and body into response fields or a classified error
pub fn parse_response(status: u16, body: &str) -> Result<ResponsePayload, RemoteError> {
    let mut fields = match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.response,
        Err(e) if (200..300).contains(&status) => {
            return Err(RemoteError::fatal(format!("malformed response body: {}", e)));
        }
        Err(_) => {
            return Err(remote_error(
                classify(status, None),
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }
    };

    let request_id = fields
        .remove("RequestId")
        .and_then(|v| v.as_str().map(str::to_string));

    if let Some(error) = fields.remove("Error") {
        let error: ApiError = serde_json::from_value(error).map_err(|e| {
            RemoteError::fatal(format!("malformed error in response: {}", e))
        })?;
        let class = classify(status, Some(&error.code));
        let message = match request_id {
            Some(id) => format!("{} (request {})", error.message, id),
            None => error.message,
        };
        return Err(remote_error(class, message).with_code(error.code));
    }

    if !(200..300).contains(&status) {
        return Err(remote_error(
            classify(status, None),
            format!("HTTP {} without error details", status),
        ));
    }

    Ok(fields)
}
