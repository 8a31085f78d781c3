//! Route handlers.

pub mod carts;
pub mod checkout;
pub mod health;
pub mod metrics;
pub mod operator;
pub mod orders;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a UUID-backed identifier from a path segment.
fn parse_id<T>(id: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
