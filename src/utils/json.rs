use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AppError;

/// `Json` extractor whose rejections use the `{"message"}` error body.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// A JSON body field that may be absent, explicitly `null`, or a string.
#[derive(Debug, PartialEq, Eq)]
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

impl NullableValue {
    /// Shape used by changesets on nullable columns: `None` leaves the column alone,
    /// `Some(None)` clears it.
    pub fn into_patch<T, E>(
        self,
        parse: impl FnOnce(String) -> Result<T, E>,
    ) -> Result<Option<Option<T>>, E> {
        match self {
            NullableValue::Omitted => Ok(None),
            NullableValue::Null => Ok(Some(None)),
            NullableValue::String(raw) => parse(raw).map(|value| Some(Some(value))),
        }
    }
}

pub fn classify_nullable(field: &str, value: Option<&Value>) -> Result<NullableValue, String> {
    match value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(_) => Err(format!("{field} must be a string or null.")),
    }
}
