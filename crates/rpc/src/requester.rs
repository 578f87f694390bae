//! Request issuing with instance ids, timeouts and retries.

use std::sync::Arc;
use std::time::Duration;

use pdrx_proto::{DecodeError, Eid, MessageHeader, PldmType, TerminusId};

use crate::{HostTransport, InstanceIdDb, InstanceIdError, PldmMessage, TransportError};

/// Requester tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequesterConfig {
	/// How long to wait for each response.
	pub response_timeout: Duration,
	/// Extra attempts after the first one times out.
	pub retries: u8,
}

impl Default for RequesterConfig {
	fn default() -> Self {
		Self { response_timeout: Duration::from_millis(2000), retries: 2 }
	}
}

/// Request failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
	/// No instance id could be allocated.
	#[error(transparent)]
	InstanceId(#[from] InstanceIdError),
	/// The transport failed.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// No response arrived within the timeout on any attempt.
	#[error("no response from {eid} after {attempts} attempts")]
	Timeout {
		/// Destination endpoint.
		eid: Eid,
		/// Attempts made.
		attempts: u8,
	},
	/// The response did not answer the request.
	#[error("response mismatch: expected command {expected:#04x}, got {found:#04x}")]
	Mismatch {
		/// Command that was sent.
		expected: u8,
		/// Command in the response.
		found: u8,
	},
	/// The response body could not be decoded.
	#[error(transparent)]
	Decode(#[from] DecodeError),
}

/// Issues requests to host termini.
///
/// Every request holds one instance id for its whole lifetime, retries
/// included, and releases it before returning.
#[derive(Clone)]
pub struct Requester {
	transport: Arc<dyn HostTransport>,
	ids: Arc<InstanceIdDb>,
	config: RequesterConfig,
}

impl std::fmt::Debug for Requester {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Requester").field("config", &self.config).finish_non_exhaustive()
	}
}

impl Requester {
	/// Creates a requester over `transport` drawing ids from `ids`.
	pub fn new(transport: Arc<dyn HostTransport>, ids: Arc<InstanceIdDb>, config: RequesterConfig) -> Self {
		Self { transport, ids, config }
	}

	/// Instance id database shared with other requesters.
	pub fn instance_ids(&self) -> &Arc<InstanceIdDb> {
		&self.ids
	}

	/// Sends a request body and returns the response body.
	pub async fn send_recv(
		&self,
		eid: Eid,
		tid: TerminusId,
		pldm_type: PldmType,
		command: u8,
		payload: Vec<u8>,
	) -> Result<Vec<u8>, RequestError> {
		let iid = self.ids.allocate(tid)?;
		let result = self.attempt_all(eid, MessageHeader::request(iid, pldm_type, command), payload).await;
		if let Err(e) = self.ids.release(tid, iid) {
			tracing::warn!(%tid, %iid, error = %e, "instance id release failed");
		}
		result
	}

	async fn attempt_all(&self, eid: Eid, header: MessageHeader, payload: Vec<u8>) -> Result<Vec<u8>, RequestError> {
		let attempts = self.config.retries.saturating_add(1);
		for attempt in 1..=attempts {
			let request = PldmMessage::new(header, payload.clone());
			match tokio::time::timeout(self.config.response_timeout, self.transport.request(eid, request)).await {
				Ok(Ok(response)) => {
					if response.header.command != header.command || response.header.pldm_type != header.pldm_type {
						return Err(RequestError::Mismatch { expected: header.command, found: response.header.command });
					}
					return Ok(response.payload);
				}
				Ok(Err(e)) => return Err(e.into()),
				Err(_) => {
					tracing::debug!(%eid, iid = %header.instance_id, command = header.command, attempt, "response timeout");
				}
			}
		}
		Err(RequestError::Timeout { eid, attempts })
	}
}

#[cfg(test)]
mod tests;
