// crates/backend-lib/src/middleware/params.rs

//! Request parameters taken from the query string and a JSON body.
use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{FromRequest, Query, Request},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;

/// Query parameters merged with the fields of a JSON object body. Body
/// fields win over query parameters of the same name.
#[derive(Debug, Clone)]
pub struct Params<T>(pub T);

impl<S, T> FromRequest<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut params = Map::new();
        if let Ok(Query(query)) = Query::<HashMap<String, String>>::try_from_uri(req.uri()) {
            params.extend(query.into_iter().map(|(k, v)| (k, Value::String(v))));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::InvalidInput(e.body_text()))?;
        if !body.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<Value>(&body)
                .map_err(|e| AppError::InvalidInput(format!("malformed JSON body: {e}")))?
            {
                Value::Object(fields) => params.extend(fields),
                _ => {
                    return Err(AppError::InvalidInput(
                        "request body must be a JSON object".to_string(),
                    ))
                },
            }
        }

        serde_json::from_value(Value::Object(params))
            .map(Params)
            .map_err(|e| AppError::InvalidInput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use passport_common::{LoginRequest, PassportTokenRequest};

    async fn extract<T: DeserializeOwned>(uri: &str, body: &str) -> Result<T, AppError> {
        let req = Request::builder()
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        Params::<T>::from_request(req, &()).await.map(|Params(t)| t)
    }

    #[tokio::test]
    async fn test_query_only() {
        let login: LoginRequest = extract("/login?username=bob&password=pw", "").await.unwrap();
        assert_eq!(login.username.as_deref(), Some("bob"));
        assert_eq!(login.password, "pw");
    }

    #[tokio::test]
    async fn test_body_wins_over_query() {
        let login: LoginRequest = extract(
            "/login?username=bob&password=query",
            r#"{"password": "body"}"#,
        )
        .await
        .unwrap();
        assert_eq!(login.username.as_deref(), Some("bob"));
        assert_eq!(login.password, "body");
    }

    #[tokio::test]
    async fn test_token_alias() {
        let req: PassportTokenRequest = extract("/passport/getByToken?token=abc", "").await.unwrap();
        assert_eq!(req.p, "abc");
    }

    #[tokio::test]
    async fn test_rejections() {
        assert!(matches!(
            extract::<LoginRequest>("/login", "").await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            extract::<LoginRequest>("/login", "[1, 2]").await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            extract::<LoginRequest>("/login", "{not json").await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
