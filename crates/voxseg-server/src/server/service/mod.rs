//! HTTP surface of the lookup service.
//!
//! ## Structure
//!
//! - [`handler`]: routes and request decoding.
//! - [`error`]: mapping of lookup failures onto status codes.

pub mod error;
pub mod handler;
