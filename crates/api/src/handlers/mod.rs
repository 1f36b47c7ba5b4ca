//! Request handlers.
//!
//! Handlers delegate to the [`JobService`](crate::service::JobService) and
//! map errors via [`AppError`](crate::error::AppError).

pub mod jobs;
