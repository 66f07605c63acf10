//! Request extractors and small response bodies.
//!
//! The extractors wrap axum's own so that malformed bodies, paths and query
//! strings come back as 422 client errors in the common error shape.

use axum::extract::{FromRequest, FromRequestParts};
use serde::Serialize;

use crate::app::errors::ApiError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl MessageResponse {
    pub const DELETED: Self = Self {
        message: "Item deleted successfully",
    };
}
