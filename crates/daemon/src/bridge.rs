//! Bridge connection supervision.
//!
//! The requester and the exchange driver live for the whole process; socket
//! connections to the MCTP bridge come and go. [`BridgeLink`] is the
//! transport the requester holds and forwards to whichever connection is
//! current. [`supervise`] connects, serves host requests on the connection,
//! and when it closes reports the host down and keeps retrying until a new
//! connection is up, at which point the host is reported up again and a
//! resync starts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use pdrx_core::{DriverClosed, DriverHandle};
use pdrx_proto::Eid;
use pdrx_rpc::{FramedTransport, HostTransport, PldmMessage, TransportError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::responder::Responder;

/// Transport forwarding to the current bridge connection.
#[derive(Default)]
pub struct BridgeLink {
	current: ArcSwapOption<FramedTransport>,
}

impl BridgeLink {
	fn install(&self, transport: Arc<FramedTransport>) {
		self.current.store(Some(transport));
	}

	fn clear(&self) {
		self.current.store(None);
	}

	/// Whether a connection is installed.
	pub fn is_connected(&self) -> bool {
		self.current.load().is_some()
	}
}

#[async_trait]
impl HostTransport for BridgeLink {
	async fn request(&self, eid: Eid, request: PldmMessage) -> Result<PldmMessage, TransportError> {
		let Some(transport) = self.current.load_full() else {
			return Err(TransportError::Closed);
		};
		transport.request(eid, request).await
	}
}

/// How [`supervise`] treats connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
	/// Delay after a failed connection attempt.
	pub retry: Duration,
	/// Resync as soon as the first connection is up.
	pub fetch_on_start: bool,
}

/// Keeps `link` connected until `shutdown` fires.
///
/// Returns early with [`DriverClosed`] when the driver is gone.
pub async fn supervise<C, Fut, R, W>(
	link: Arc<BridgeLink>,
	mut connect: C,
	driver: DriverHandle,
	responder: Responder,
	options: LinkOptions,
	shutdown: CancellationToken,
) -> Result<(), DriverClosed>
where
	C: FnMut() -> Fut,
	Fut: Future<Output = std::io::Result<(R, W)>>,
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let mut reconnecting = false;
	loop {
		let attempt = tokio::select! {
			_ = shutdown.cancelled() => return Ok(()),
			attempt = connect() => attempt,
		};
		let (reader, writer) = match attempt {
			Ok(halves) => halves,
			Err(e) => {
				warn!(error = %e, retry_ms = options.retry.as_millis() as u64, "bridge connect failed");
				tokio::select! {
					_ = shutdown.cancelled() => return Ok(()),
					_ = tokio::time::sleep(options.retry) => continue,
				}
			}
		};

		let (transport, inbound) = FramedTransport::spawn(reader, writer);
		link.install(transport.clone());
		let responder_task = tokio::spawn(responder.clone().run(transport.clone(), inbound));
		if reconnecting {
			info!("bridge reconnected, host reachable");
			driver.host_up()?;
		} else {
			info!("bridge connected");
			if options.fetch_on_start {
				driver.resync()?;
			}
		}

		let closed = transport.closed();
		let stopping = tokio::select! {
			_ = closed.cancelled() => false,
			_ = shutdown.cancelled() => true,
		};
		link.clear();
		transport.shutdown();
		let _ = responder_task.await;
		if stopping {
			return Ok(());
		}
		warn!("bridge connection closed, host unreachable");
		driver.host_down()?;
		reconnecting = true;
	}
}
