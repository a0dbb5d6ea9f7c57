//! carbonq Server
//!
//! The HTTP surface of the query API and everything request-scoped behind
//! it: parameter handling, the fetch coordinator, the response encoders and
//! the rendering-backend seam.
//!
//! # Request Flow
//!
//! `/render` normalizes the query string into a cache key and consults the
//! query cache. On a miss each target is parsed, its metric fetches are
//! resolved through the find cache and the zipper (renders fan out in
//! parallel under the process-wide limiter), the expression is evaluated
//! inside a fault boundary, and the encoded body is stored back under the
//! cache key.
//!
//! # Main Components
//!
//! - [`HttpServer`] - the axum application and listener
//! - [`AppState`] - process-wide singletons handed to every handler
//! - [`coordinator`] - glob resolution and the render fan-out
//! - [`formats`] / [`pickle`] - response encoders
//! - [`backend::Renderer`] - the pluggable PNG backend seam

pub mod backend;
pub mod coordinator;
pub mod find;
pub mod formats;
pub mod params;
pub mod pickle;
pub mod render;
pub mod state;

mod http_server;

pub use http_server::HttpServer;
pub use state::AppState;
