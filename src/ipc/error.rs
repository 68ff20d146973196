use crate::config::UpdateError;
use crate::error::SchoolError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SchoolError> for HandlerErr {
    fn from(e: SchoolError) -> Self {
        let details = match &e {
            SchoolError::FutureDate { date } => Some(json!({ "date": date.to_string() })),
            SchoolError::OutOfRange { value } => Some(json!({ "value": value, "min": 0, "max": 100 })),
            SchoolError::Db(inner) => {
                tracing::error!(error = %inner, "storage error");
                None
            }
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "storage error");
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

impl From<UpdateError> for HandlerErr {
    fn from(e: UpdateError) -> Self {
        match e {
            UpdateError::Invalid(msg) => Self::bad_params(msg),
            UpdateError::Storage(inner) => inner.into(),
        }
    }
}
