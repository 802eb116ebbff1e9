//! Test support utilities.
//!
//! The mock HTTP server here lets stream tests run against scripted
//! responses on a loopback socket instead of real origins.

pub mod mock_http;

pub use mock_http::{ConnectionScript, MockHttpServer};
