//! Data Transfer Objects for HTTP responses.

pub mod response;
