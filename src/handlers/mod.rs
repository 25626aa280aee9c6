pub mod call;
pub mod config;
pub mod memory;

pub use call::*;
pub use config::*;
pub use memory::*;

use crate::error::AppError;
use actix_web::HttpRequest;

/// Fallback for unknown routes, rendered in the standard error shape.
pub async fn not_found(req: HttpRequest) -> Result<actix_web::HttpResponse, AppError> {
    Err(AppError::NotFound(format!("{} {}", req.method(), req.path())))
}
