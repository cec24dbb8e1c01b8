//! Network boundary of the engine.
//!
//! The engine never talks to sockets itself. It hands a [`Request`] to a [`Transport`]
//! and gets back a fully buffered [`Response`]. [`HttpTransport`] does real HTTP through
//! `reqwest`, [`StaticTransport`] serves canned responses from memory.

mod request;
mod response;
mod static_transport;
mod transport;

pub use request::Request;
pub use response::{Response, ResponseBuilder};
pub use static_transport::StaticTransport;
pub use transport::{HttpTransport, Transport};
