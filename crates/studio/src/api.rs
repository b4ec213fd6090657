//! Request/response surface over the session store
//!
//! Every call returns an `ApiResponse`; errors are translated into a stable
//! code and a message naming the operation that failed. Store backend
//! details stay in the logs.

use crate::error::StudioError;
use crate::history::SessionInfo;
use crate::ops::Operation;
use crate::store::{SessionStore, SessionView};
use crate::table::{self, TablePreview};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<TablePreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn failed(operation: &str, err: &StudioError) -> Self {
        let message = match err {
            StudioError::StoreUnavailable(_) => {
                format!("{} failed: session store is unavailable, please retry", operation)
            }
            other => format!("{} failed: {}", operation, other),
        };
        if err.is_retryable() || matches!(err, StudioError::CorruptSession(_)) {
            diagnostics::error!(
                "{operation} failed: {error}",
                operation: operation,
                error: err.to_string()
            );
        } else {
            diagnostics::debug!(
                "{operation} rejected with {code}",
                operation: operation,
                code: err.code()
            );
        }
        Self {
            success: false,
            error: Some(ApiError {
                code: err.code().to_string(),
                message,
                retryable: err.is_retryable(),
            }),
            ..Self::default()
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

pub struct StudioApi {
    store: Arc<SessionStore>,
    preview_rows: usize,
}

impl StudioApi {
    pub fn new(store: Arc<SessionStore>) -> Self {
        let preview_rows = store.config().preview_rows;
        Self { store, preview_rows }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn view_response(&self, operation: &str, result: crate::Result<SessionView>) -> ApiResponse {
        let view = match result {
            Ok(view) => view,
            Err(e) => return ApiResponse::failed(operation, &e),
        };
        match table::preview(&view.batch, 0, self.preview_rows) {
            Ok(preview) => ApiResponse {
                session: Some(view.info),
                preview: Some(preview),
                ..ApiResponse::ok()
            },
            Err(e) => ApiResponse::failed(operation, &e),
        }
    }

    fn data_response<T: Serialize>(
        operation: &str,
        result: crate::Result<T>,
        session: Option<SessionInfo>,
    ) -> ApiResponse {
        let value = match result {
            Ok(value) => value,
            Err(e) => return ApiResponse::failed(operation, &e),
        };
        match serde_json::to_value(value) {
            Ok(data) => ApiResponse {
                session,
                data: Some(data),
                ..ApiResponse::ok()
            },
            Err(e) => ApiResponse::failed(operation, &StudioError::CorruptSession(e.to_string())),
        }
    }

    pub async fn initialize(&self, user: &str, source: &str) -> ApiResponse {
        self.view_response("initialize", self.store.initialize(user, source).await)
    }

    pub async fn status(&self, user: &str, source: &str) -> ApiResponse {
        match self.store.status(user, source).await {
            Ok(info) => ApiResponse {
                session: Some(info),
                ..ApiResponse::ok()
            },
            Err(e) => ApiResponse::failed("status", &e),
        }
    }

    pub async fn apply(&self, user: &str, source: &str, operation: Operation) -> ApiResponse {
        self.view_response("apply", self.store.apply(user, source, operation).await)
    }

    /// Apply an operation submitted as JSON, e.g.
    /// `{"type": "scale", "columns": ["x"], "method": "robust"}`
    pub async fn apply_json(&self, user: &str, source: &str, json: &str) -> ApiResponse {
        match serde_json::from_str::<Operation>(json) {
            Ok(operation) => self.apply(user, source, operation).await,
            Err(e) => ApiResponse::failed(
                "apply",
                &StudioError::invalid_operation(format!("malformed operation: {}", e)),
            ),
        }
    }

    pub async fn undo(&self, user: &str, source: &str) -> ApiResponse {
        self.view_response("undo", self.store.undo(user, source).await)
    }

    pub async fn redo(&self, user: &str, source: &str) -> ApiResponse {
        self.view_response("redo", self.store.redo(user, source).await)
    }

    pub async fn clear(&self, user: &str, source: &str) -> ApiResponse {
        let result = self
            .store
            .clear(user, source)
            .await
            .map(|existed| serde_json::json!({ "cleared": existed }));
        Self::data_response("clear", result, None)
    }

    pub async fn save(&self, user: &str, source: &str, name: &str, description: &str) -> ApiResponse {
        let result = self.store.save(user, source, name, description).await;
        Self::data_response("save", result, None)
    }

    pub async fn history(&self, user: &str, source: &str) -> ApiResponse {
        Self::data_response("history", self.store.history(user, source).await, None)
    }

    pub async fn preview(&self, user: &str, source: &str, offset: usize, limit: usize) -> ApiResponse {
        match self.store.preview(user, source, offset, limit).await {
            Ok(preview) => ApiResponse {
                preview: Some(preview),
                ..ApiResponse::ok()
            },
            Err(e) => ApiResponse::failed("preview", &e),
        }
    }

    pub async fn profile(&self, user: &str, source: &str) -> ApiResponse {
        Self::data_response("profile", self.store.profile(user, source).await, None)
    }
}
