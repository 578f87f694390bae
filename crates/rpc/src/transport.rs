//! Transport seam between requesters and the wire.

use async_trait::async_trait;
use pdrx_proto::{DecodeError, Eid, MessageHeader};

/// A PLDM message: header plus command body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PldmMessage {
	/// Message header.
	pub header: MessageHeader,
	/// Command body following the header.
	pub payload: Vec<u8>,
}

impl PldmMessage {
	/// Creates a message.
	pub fn new(header: MessageHeader, payload: Vec<u8>) -> Self {
		Self { header, payload }
	}
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
	/// The connection to the endpoint is gone.
	#[error("transport closed")]
	Closed,
	/// A request with the same endpoint and instance id is already in flight.
	#[error("request {iid} to {eid} already in flight")]
	Busy {
		/// Destination endpoint.
		eid: Eid,
		/// Conflicting instance id.
		iid: pdrx_proto::InstanceId,
	},
	/// A frame could not be decoded.
	#[error("malformed frame: {0}")]
	Malformed(#[from] DecodeError),
	/// Reading or writing the underlying stream failed.
	#[error("transport I/O: {0}")]
	Io(String),
}

impl From<std::io::Error> for TransportError {
	fn from(e: std::io::Error) -> Self {
		match e.kind() {
			std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => Self::Closed,
			_ => Self::Io(e.to_string()),
		}
	}
}

/// Sends one request and waits for the matching response.
///
/// Implementations match responses by `(eid, instance id)`. They do not
/// time out on their own; callers bound the wait and dropping the returned
/// future must release any per-request state.
#[async_trait]
pub trait HostTransport: Send + Sync {
	/// Sends `request` to `eid` and returns the response message.
	async fn request(&self, eid: Eid, request: PldmMessage) -> Result<PldmMessage, TransportError>;
}
