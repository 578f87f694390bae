//! Framed transport over a byte stream.
//!
//! One reader task and one writer task own the two halves of the stream.
//! Outgoing requests register a `oneshot` sender in the pending map keyed by
//! `(eid, instance id)`; the reader completes it when the matching response
//! arrives. Frames with the request bit set are host-initiated requests and go
//! to the inbound channel returned by [`FramedTransport::spawn`].
//!
//! When either task stops, the transport is closed: the cancellation token
//! fires, pending senders are dropped and every waiter sees
//! [`TransportError::Closed`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pdrx_proto::{Eid, InstanceId};
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::framing::{read_frame, write_frame};
use crate::{HostTransport, PldmMessage, TransportError};

const OUTBOUND_QUEUE_LEN: usize = 64;
const INBOUND_QUEUE_LEN: usize = 32;

type PendingKey = (Eid, InstanceId);
type PendingMap = Arc<Mutex<FxHashMap<PendingKey, oneshot::Sender<PldmMessage>>>>;

/// A request initiated by a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
	/// Endpoint that sent the request.
	pub eid: Eid,
	/// The request message.
	pub message: PldmMessage,
}

/// Transport multiplexing requests, responses and inbound requests over one stream.
#[derive(Debug)]
pub struct FramedTransport {
	outbound: mpsc::Sender<(Eid, PldmMessage)>,
	pending: PendingMap,
	closed: CancellationToken,
}

impl FramedTransport {
	/// Spawns the reader and writer tasks and returns the transport plus the
	/// receiver of host-initiated requests.
	pub fn spawn<R, W>(reader: R, writer: W) -> (Arc<Self>, mpsc::Receiver<InboundRequest>)
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
		let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_LEN);
		let pending = PendingMap::default();
		let closed = CancellationToken::new();

		tokio::spawn(write_loop(writer, outbound_rx, closed.clone()));
		tokio::spawn(read_loop(reader, pending.clone(), inbound_tx, closed.clone()));

		(Arc::new(Self { outbound, pending, closed }), inbound_rx)
	}

	/// Queues a message without waiting for any reply. Used for responses to
	/// inbound requests.
	pub async fn send(&self, eid: Eid, message: PldmMessage) -> Result<(), TransportError> {
		if self.closed.is_cancelled() {
			return Err(TransportError::Closed);
		}
		self.outbound.send((eid, message)).await.map_err(|_| TransportError::Closed)
	}

	/// Token cancelled once the transport has stopped.
	pub fn closed(&self) -> CancellationToken {
		self.closed.clone()
	}

	/// Stops both tasks.
	pub fn shutdown(&self) {
		self.closed.cancel();
	}
}

struct PendingGuard<'a> {
	pending: &'a PendingMap,
	key: PendingKey,
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		self.pending.lock().remove(&self.key);
	}
}

#[async_trait]
impl HostTransport for FramedTransport {
	async fn request(&self, eid: Eid, request: PldmMessage) -> Result<PldmMessage, TransportError> {
		let key = (eid, request.header.instance_id);
		let (tx, rx) = oneshot::channel();
		{
			let mut pending = self.pending.lock();
			if pending.contains_key(&key) {
				return Err(TransportError::Busy { eid, iid: key.1 });
			}
			pending.insert(key, tx);
		}
		let _guard = PendingGuard { pending: &self.pending, key };

		self.send(eid, request).await?;
		tokio::select! {
			response = rx => response.map_err(|_| TransportError::Closed),
			_ = self.closed.cancelled() => Err(TransportError::Closed),
		}
	}
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<(Eid, PldmMessage)>, closed: CancellationToken)
where
	W: AsyncWrite + Unpin,
{
	loop {
		let (eid, message) = tokio::select! {
			_ = closed.cancelled() => break,
			next = outbound.recv() => match next {
				Some(next) => next,
				None => break,
			},
		};
		if let Err(e) = write_frame(&mut writer, eid, &message).await {
			warn!(%eid, error = %e, "frame write failed");
			break;
		}
	}
	closed.cancel();
}

async fn read_loop<R>(mut reader: R, pending: PendingMap, inbound: mpsc::Sender<InboundRequest>, closed: CancellationToken)
where
	R: AsyncRead + Unpin,
{
	loop {
		let frame = tokio::select! {
			_ = closed.cancelled() => break,
			frame = read_frame(&mut reader) => frame,
		};
		let (eid, message) = match frame {
			Ok(Some(frame)) => frame,
			Ok(None) => {
				debug!("transport stream ended");
				break;
			}
			Err(e) => {
				warn!(error = %e, "frame read failed");
				break;
			}
		};

		if message.header.request {
			if inbound.send(InboundRequest { eid, message }).await.is_err() {
				debug!(%eid, "inbound request dropped: no responder");
			}
			continue;
		}

		let waiter = pending.lock().remove(&(eid, message.header.instance_id));
		match waiter {
			Some(tx) => {
				let _ = tx.send(message);
			}
			None => debug!(%eid, iid = %message.header.instance_id, "unsolicited response dropped"),
		}
	}
	closed.cancel();
	pending.lock().clear();
}
