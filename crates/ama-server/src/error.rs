use ama_store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

/// Broad class of a request failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    PersistenceUnavailable,
    UpgradeFailed,
}

/// Every way an HTTP request can fail. Rendered as a plain-text body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid room id")]
    InvalidRoomId,

    #[error("invalid message id")]
    InvalidMessageId,

    #[error("invalid request body")]
    InvalidBody(String),

    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("message not found in this room")]
    MessageNotInRoom,

    #[error("internal server error")]
    PersistenceUnavailable {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to upgrade to ws connection")]
    UpgradeFailed(String),
}

impl ApiError {
    /// Wrap a store failure from `op`.
    pub fn persistence(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::PersistenceUnavailable { op, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRoomId | Self::InvalidMessageId | Self::InvalidBody(_) => ErrorKind::InvalidInput,
            Self::RoomNotFound | Self::MessageNotFound | Self::MessageNotInRoom => ErrorKind::NotFound,
            Self::PersistenceUnavailable { .. } => ErrorKind::PersistenceUnavailable,
            Self::UpgradeFailed(_) => ErrorKind::UpgradeFailed,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::UpgradeFailed => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PersistenceUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::PersistenceUnavailable { op, source } => {
                error!(op = *op, error = %source, "persistence gateway error");
            }
            Self::InvalidBody(detail) | Self::UpgradeFailed(detail) => {
                debug!(error = %self, detail = %detail, "rejected request");
            }
            _ => {}
        }
        (self.status(), self.to_string()).into_response()
    }
}
