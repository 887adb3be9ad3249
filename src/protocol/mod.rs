//! Frame-level codec for the PostgreSQL v3 protocol.
//!
//! [`framing`] moves whole messages on and off an async stream: a tag byte,
//! a big-endian `i32` length that counts itself, then the payload. The
//! startup packet and `SSLRequest` are the only untagged frames.
//!
//! [`messages`] turns payloads into typed values for the subset a connection
//! needs during setup and simple queries: authentication requests, parameter
//! status, backend key data, row descriptions, data rows, command tags and
//! error/notice fields.

pub mod framing;
pub mod messages;

pub use framing::{BackendMessage, FrontendMessage};
pub use messages::{AuthenticationMessage, ErrorFields, FieldDescription, parse_error_response};
