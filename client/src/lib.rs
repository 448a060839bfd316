//! Wire-level plumbing for the ask-many-models service.
//!
//! - [`EventDecoder`] / [`decode_stream`]: byte chunks to typed [`WireEvent`]s,
//!   independent of chunk boundaries.
//! - [`HttpTransport`]: opens the `POST /api/chat` response stream behind the
//!   [`ChatTransport`] seam.
//! - [`HttpRemoteStore`]: the chat-store endpoints behind [`RemoteStore`].
//!
//! No retries happen at this layer.
//!
//! [`WireEvent`]: chorus_types::WireEvent

mod decoder;
mod error;
mod http;
mod remote;

pub use decoder::{ByteStream, EventDecoder, decode_stream};
pub use error::TransportError;
pub use http::{ChatTransport, ClientFut, HttpTransport, http_client, read_capped_error_body};
pub use remote::{HttpRemoteStore, RemoteStore};

pub use chorus_types;
