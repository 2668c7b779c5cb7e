use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;
use crate::models::Res;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found.")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("Not enough seats available. Requested: {requested}, remaining: {remaining}.")]
    InsufficientCapacity { requested: i32, remaining: i32 },
    #[error("The selected slot is not accepting reservations.")]
    Closed,
    #[error("{0}")]
    Eligibility(String),
    #[error("storage error: {0}")]
    Infrastructure(String),
}

impl From<diesel::result::Error> for BookingError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => BookingError::NotFound("Record"),
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => BookingError::Conflict("Record already exists.".to_string()),
            other => BookingError::Infrastructure(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for BookingError {
    fn from(e: r2d2::Error) -> Self {
        BookingError::Infrastructure(e.to_string())
    }
}

impl ResponseError for BookingError {
    fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::Conflict(_)
            | BookingError::InsufficientCapacity { .. }
            | BookingError::Closed => StatusCode::CONFLICT,
            BookingError::Eligibility(_) => StatusCode::FORBIDDEN,
            BookingError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Infrastructure details go to the log, never to the client.
        if let BookingError::Infrastructure(detail) = self {
            log::error!("infrastructure failure: {}", detail);
            return HttpResponse::InternalServerError().json(Res {
                message: "Internal error. Please retry.".to_string(),
            });
        }
        HttpResponse::build(self.status_code()).json(Res {
            message: self.to_string(),
        })
    }
}
