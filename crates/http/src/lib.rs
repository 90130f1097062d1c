//! Transport boundary for the tus upload engine.
//!
//! [`TusTransport`] is the only way the engine talks to a server, which
//! keeps the session state machine testable against in-memory fakes.
//! [`HttpTransport`] implements it over `reqwest`.

mod client;
mod error;
mod transport;

pub use client::{HttpConfig, HttpTransport};
pub use error::TransportError;
pub use reqwest::Url;
pub use transport::{BoxFuture, Headers, RemoteOffset, TusTransport};
