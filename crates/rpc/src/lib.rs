//! Request/response plumbing between the BMC and host termini.
//!
//! This crate provides the pieces every PLDM request goes through:
//! * [`InstanceIdDb`]: per-terminus instance id pools
//! * [`HostTransport`]: the seam between requesters and the wire
//! * [`Requester`]: instance id allocation, response timeout and retries
//! * [`FramedTransport`]: length-delimited frames over a byte stream with a
//!   pending-response map and a channel for host-initiated requests

#![warn(missing_docs)]

pub mod framing;
pub mod instance_id;
pub mod requester;
pub mod socket;
pub mod transport;

pub use framing::{read_frame, write_frame};
pub use instance_id::{InstanceIdDb, InstanceIdError};
pub use requester::{RequestError, Requester, RequesterConfig};
pub use socket::{FramedTransport, InboundRequest};
pub use transport::{HostTransport, PldmMessage, TransportError};
