use thiserror::Error;

/// Failures of the order request path. Validation failures name the violated
/// field and map to 400; everything else maps to 500 with an opaque body.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid {0}")]
    Validation(&'static str),
    #[error("Not Found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrderError {
    pub fn status_code(&self) -> u16 {
        match self {
            OrderError::Validation(_) => 400,
            OrderError::NotFound => 404,
            OrderError::Internal(_) => 500,
        }
    }

    /// The response body for this error, as cached by the idempotency layer
    /// and returned to the client. Internal details are never exposed.
    pub fn body(&self) -> serde_json::Value {
        match self {
            OrderError::Validation(_) | OrderError::NotFound => {
                serde_json::json!({ "error": self.to_string() })
            }
            OrderError::Internal(_) => serde_json::json!({ "error": "Internal Server Error" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_name_the_field() {
        let err = OrderError::Validation("customerId");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.body(), serde_json::json!({ "error": "Invalid customerId" }));
    }

    #[test]
    fn internal_errors_are_opaque() {
        let err = OrderError::Internal(anyhow::anyhow!("connection reset by peer"));
        assert_eq!(err.status_code(), 500);
        assert_eq!(
            err.body(),
            serde_json::json!({ "error": "Internal Server Error" })
        );
    }
}
