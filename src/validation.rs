use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::AppError;

/// `Json` whose rejections (missing content type, malformed body) render as
/// `{"message": ...}` 400s.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request(format!("Invalid JSON: {}", e.body_text())))?;
        Ok(Self(value))
    }
}

/// `Path` whose rejections render as `{"message": ...}` 400s.
pub struct AppPath<T>(pub T);

impl<T, S> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request(format!("Invalid path: {}", e.body_text())))?;
        Ok(Self(value))
    }
}

/// JSON body extractor that runs `validator` rules before the handler sees
/// the payload. Failures are 400s listing every offending field.
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let AppJson(value) = AppJson::<T>::from_request(req, state).await?;

        value
            .validate()
            .map_err(|errors| AppError::bad_request(validation_message(&errors)))?;

        Ok(Self(value))
    }
}

/// Deserializes and validates a payload that arrived as loose JSON, e.g. one
/// whose shape depends on a path parameter.
pub fn parse_payload<T>(value: Value) -> Result<T, AppError>
where
    T: DeserializeOwned + Validate,
{
    let payload: T = serde_json::from_value(value)
        .map_err(|e| AppError::bad_request(format!("Invalid JSON: {e}")))?;
    payload
        .validate()
        .map_err(|errors| AppError::bad_request(validation_message(&errors)))?;
    Ok(payload)
}

/// Flattens `validator` errors into `Validation failed: field: message, ...`.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .errors()
        .iter()
        .flat_map(|(field, kind)| match kind {
            validator::ValidationErrorsKind::Field(errors) => errors
                .iter()
                .map(|error| format!("{field}: {}", describe(error)))
                .collect::<Vec<_>>(),
            validator::ValidationErrorsKind::Struct(nested) => vec![format!(
                "{field}: {}",
                validation_message(nested).trim_start_matches("Validation failed: ")
            )],
            validator::ValidationErrorsKind::List(items) => items
                .iter()
                .map(|(index, nested)| {
                    format!(
                        "{field}[{index}]: {}",
                        validation_message(nested).trim_start_matches("Validation failed: ")
                    )
                })
                .collect(),
        })
        .collect();
    messages.sort();
    format!("Validation failed: {}", messages.join(", "))
}

fn describe(error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| error.code.to_string())
}

/// `#rgb` or `#rrggbb`.
pub fn validate_hex_color(value: &str) -> Result<(), ValidationError> {
    let digits = value
        .strip_prefix('#')
        .ok_or_else(|| ValidationError::new("hex_color"))?;
    let valid_len = digits.len() == 3 || digits.len() == 6;
    if valid_len && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::new("hex_color"))
    }
}

pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new("blank"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_colors() {
        assert!(validate_hex_color("#1a73e8").is_ok());
        assert!(validate_hex_color("#FFF").is_ok());
        assert!(validate_hex_color("1a73e8").is_err());
        assert!(validate_hex_color("#12345").is_err());
        assert!(validate_hex_color("#gggggg").is_err());
    }

    #[derive(Debug, serde::Deserialize, Validate)]
    struct Signup {
        #[validate(email(message = "must be a valid email address"))]
        email: String,
        #[validate(length(min = 8, message = "must be at least 8 characters"))]
        password: String,
    }

    #[test]
    fn test_parse_payload_reports_every_field() {
        let err = parse_payload::<Signup>(serde_json::json!({
            "email": "nope",
            "password": "short",
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: email: must be a valid email address, \
             password: must be at least 8 characters"
        );
    }

    #[test]
    fn test_parse_payload_rejects_wrong_shape() {
        let err = parse_payload::<Signup>(serde_json::json!({ "email": 1 })).unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON"));
    }

    #[test]
    fn test_blank() {
        assert!(validate_not_blank("Acme").is_ok());
        assert!(validate_not_blank("   ").is_err());
    }
}
