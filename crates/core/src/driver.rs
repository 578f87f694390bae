//! Async driver running the exchange engine on one task.
//!
//! [`HostPdrExchange`] is synchronous and owns the repository and tree. The
//! driver owns the engine and serializes every access through one message
//! channel. Each fetch step is its own `Step` message and every GetPDR runs
//! on a spawned task that posts a `Response` back, so the loop keeps serving
//! host GetPDR requests and triggers while a request is outstanding.
//!
//! The change notification is fire-and-forget: its response is decoded for
//! the log and never retried.
//!
//! With a sensor sink attached, every completed cycle is followed by one
//! GetStateSensorReadings per indexed host state sensor. Enabled present
//! states go through the same validation as host sensor events, so the sink
//! starts from the host's current state rather than waiting for the next
//! change.

use std::sync::Arc;

use pdrx_proto::platform::{GET_PDR, GET_STATE_SENSOR_READINGS, PLATFORM_EVENT_MESSAGE};
use pdrx_proto::{
	Eid, GetPdrRequest, GetPdrResponse, GetStateSensorReadingsRequest, GetStateSensorReadingsResponse, PldmType,
	PlatformEventResponse, RecordHandle,
};
use pdrx_rpc::{RequestError, Requester};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::exchange::{ChangeNotification, CycleId, ExchangeError, FetchRequest, HostPdrExchange, ResponseOutcome};
use crate::sensors::{SensorEntry, SensorEventHandler, SensorEventSink, StatusCode};

enum Msg {
	Resync,
	Fetch(Vec<RecordHandle>),
	Delete(Vec<RecordHandle>),
	HostDown,
	HostUp,
	Step,
	Response { cycle: CycleId, result: Result<Vec<u8>, RequestError> },
	ServeGetPdr { request: GetPdrRequest, reply: oneshot::Sender<GetPdrResponse> },
	Shutdown,
}

/// Something the driver did, for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
	/// A cycle completed.
	CycleComplete {
		/// The cycle.
		cycle: CycleId,
		/// What it changed, `None` when nothing did.
		notification: Option<ChangeNotification>,
	},
	/// A cycle aborted.
	CycleAborted(ExchangeError),
	/// Present states were read back after a completed cycle.
	SensorStatesSeeded {
		/// The cycle whose index was read.
		cycle: CycleId,
		/// Sensors that answered.
		read: usize,
		/// Present states the sink accepted.
		applied: usize,
	},
}

/// The driver task is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("exchange driver stopped")]
pub struct DriverClosed;

/// Cloneable handle feeding the driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
	tx: mpsc::UnboundedSender<Msg>,
}

impl std::fmt::Debug for Msg {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Resync => f.write_str("Resync"),
			Self::Fetch(handles) => f.debug_tuple("Fetch").field(&handles.len()).finish(),
			Self::Delete(handles) => f.debug_tuple("Delete").field(&handles.len()).finish(),
			Self::HostDown => f.write_str("HostDown"),
			Self::HostUp => f.write_str("HostUp"),
			Self::Step => f.write_str("Step"),
			Self::Response { cycle, .. } => f.debug_struct("Response").field("cycle", cycle).finish_non_exhaustive(),
			Self::ServeGetPdr { request, .. } => f.debug_tuple("ServeGetPdr").field(&request.record_handle).finish(),
			Self::Shutdown => f.write_str("Shutdown"),
		}
	}
}

impl DriverHandle {
	fn send(&self, msg: Msg) -> Result<(), DriverClosed> {
		self.tx.send(msg).map_err(|_| DriverClosed)
	}

	/// Starts a full resync, superseding any running cycle.
	pub fn resync(&self) -> Result<(), DriverClosed> {
		self.send(Msg::Resync)
	}

	/// Fetches the listed host records.
	pub fn fetch(&self, handles: Vec<RecordHandle>) -> Result<(), DriverClosed> {
		self.send(Msg::Fetch(handles))
	}

	/// Removes what the listed host records contributed.
	pub fn delete(&self, handles: Vec<RecordHandle>) -> Result<(), DriverClosed> {
		self.send(Msg::Delete(handles))
	}

	/// Reports the host unreachable.
	pub fn host_down(&self) -> Result<(), DriverClosed> {
		self.send(Msg::HostDown)
	}

	/// Reports the host reachable again, which starts a resync.
	pub fn host_up(&self) -> Result<(), DriverClosed> {
		self.send(Msg::HostUp)
	}

	/// Answers a host GetPDR out of the BMC repository.
	pub async fn serve_get_pdr(&self, request: GetPdrRequest) -> Result<GetPdrResponse, DriverClosed> {
		let (reply, rx) = oneshot::channel();
		self.send(Msg::ServeGetPdr { request, reply })?;
		rx.await.map_err(|_| DriverClosed)
	}

	/// Stops the driver after the messages already queued.
	pub fn shutdown(&self) -> Result<(), DriverClosed> {
		self.send(Msg::Shutdown)
	}
}

/// Owns a [`HostPdrExchange`] and performs its I/O.
pub struct ExchangeDriver {
	engine: HostPdrExchange,
	requester: Requester,
	rx: mpsc::UnboundedReceiver<Msg>,
	tx: mpsc::WeakUnboundedSender<Msg>,
	events: Option<mpsc::UnboundedSender<DriverEvent>>,
	sensor_events: Option<SensorEventHandler>,
}

impl ExchangeDriver {
	/// Creates a driver and the handle feeding it.
	pub fn new(engine: HostPdrExchange, requester: Requester) -> (Self, DriverHandle) {
		let (tx, rx) = mpsc::unbounded_channel();
		let driver = Self { engine, requester, rx, tx: tx.downgrade(), events: None, sensor_events: None };
		(driver, DriverHandle { tx })
	}

	/// Reports cycle outcomes on `events`.
	pub fn with_events(mut self, events: mpsc::UnboundedSender<DriverEvent>) -> Self {
		self.events = Some(events);
		self
	}

	/// Reads the host's state sensors after every completed cycle and reports
	/// their present states to `sink`.
	pub fn with_sensor_sink(mut self, sink: Arc<dyn SensorEventSink>) -> Self {
		self.sensor_events = Some(SensorEventHandler::new(self.engine.sensor_index().clone(), sink));
		self
	}

	/// Runs until [`DriverHandle::shutdown`] or until every handle is dropped
	/// and no request is outstanding.
	///
	/// Returns the engine, or the fatal error that stopped the loop.
	pub async fn run(mut self) -> Result<HostPdrExchange, ExchangeError> {
		info!("exchange driver started");
		while let Some(msg) = self.rx.recv().await {
			debug!(?msg, "driver message");
			match msg {
				Msg::Resync => {
					self.engine.begin_resync();
					self.schedule_step();
				}
				Msg::Fetch(handles) => {
					if self.engine.begin_fetch(handles).is_some() {
						self.schedule_step();
					}
				}
				Msg::Delete(handles) => match self.engine.delete_pdr_from_repo(handles) {
					Ok(touched) => debug!(records = touched.len(), "host records deleted"),
					Err(e) => warn!(error = %e, "deleting host records failed"),
				},
				Msg::HostDown => {
					self.engine.host_link().set_up(false);
					match self.engine.on_host_down() {
						Ok(changed) => info!(locators = changed.len(), "host down"),
						Err(e) => warn!(error = %e, "invalidating host termini failed"),
					}
				}
				Msg::HostUp => {
					info!("host up, starting resync");
					self.engine.host_link().set_up(true);
					self.engine.begin_resync();
					self.schedule_step();
				}
				Msg::Step => self.step(),
				Msg::Response { cycle, result } => match self.engine.on_response(cycle, result) {
					Ok(ResponseOutcome::Continue) => self.schedule_step(),
					Ok(ResponseOutcome::Complete(notification)) => {
						if let Some(notification) = &notification {
							self.notify_host(notification);
						}
						self.emit(DriverEvent::CycleComplete { cycle, notification });
						self.seed_sensor_states(cycle);
					}
					Ok(ResponseOutcome::Stale) => {}
					Err(e) if e.is_fatal() => {
						self.emit(DriverEvent::CycleAborted(e.clone()));
						return Err(e);
					}
					Err(e) => self.emit(DriverEvent::CycleAborted(e)),
				},
				Msg::ServeGetPdr { request, reply } => {
					let _ = reply.send(self.engine.serve_get_pdr(&request));
				}
				Msg::Shutdown => break,
			}
		}
		info!("exchange driver stopped");
		Ok(self.engine)
	}

	fn emit(&self, event: DriverEvent) {
		if let Some(events) = &self.events {
			let _ = events.send(event);
		}
	}

	fn schedule_step(&self) {
		if let Some(tx) = self.tx.upgrade() {
			let _ = tx.send(Msg::Step);
		}
	}

	fn step(&mut self) {
		match self.engine.next_request() {
			Ok(Some(fetch)) => self.spawn_fetch(fetch),
			Ok(None) => {}
			Err(e) => self.emit(DriverEvent::CycleAborted(e)),
		}
	}

	fn spawn_fetch(&self, fetch: FetchRequest) {
		let Some(tx) = self.tx.upgrade() else {
			return;
		};
		let requester = self.requester.clone();
		let config = self.engine.config();
		let (eid, tid) = (config.host_eid, config.host_tid);
		tokio::spawn(async move {
			let result = requester.send_recv(eid, tid, PldmType::Platform, GET_PDR, fetch.request.encode()).await;
			let _ = tx.send(Msg::Response { cycle: fetch.cycle, result });
		});
	}

	fn notify_host(&self, notification: &ChangeNotification) {
		let requester = self.requester.clone();
		let config = self.engine.config();
		let (eid, tid) = (config.host_eid, config.host_tid);
		let event = match notification.to_event(config.bmc_tid) {
			Ok(event) => event,
			Err(e) => {
				error!(error = %e, "repository change does not fit one event");
				return;
			}
		};
		let (added, modified, deleted) =
			(notification.added.len(), notification.modified.len(), notification.deleted.len());
		tokio::spawn(async move {
			let result = requester.send_recv(eid, tid, PldmType::Platform, PLATFORM_EVENT_MESSAGE, event.encode()).await;
			match result.map(|body| PlatformEventResponse::decode(&body)) {
				Ok(Ok(response)) if response.completion_code.is_success() => {
					debug!(added, modified, deleted, status = response.status, "host acknowledged repository change");
				}
				Ok(Ok(response)) => warn!(code = %response.completion_code, "host rejected repository change event"),
				Ok(Err(e)) => warn!(error = %e, "undecodable repository change acknowledgement"),
				Err(e) => error!(error = %e, "sending repository change event failed"),
			}
		});
	}

	fn seed_sensor_states(&self, cycle: CycleId) {
		let Some(handler) = self.sensor_events.clone() else {
			return;
		};
		let map = self.engine.sensor_index().load();
		if map.is_empty() || !self.engine.host_link().is_up() {
			return;
		}
		let host_eid = self.engine.config().host_eid;
		let termini = self.engine.termini();
		let sensors: Vec<(SensorEntry, Eid, Vec<u16>)> = map
			.iter()
			.map(|(entry, info)| {
				let eid = termini.values().find(|t| t.tid == entry.tid).and_then(|t| t.eid).unwrap_or(host_eid);
				(*entry, eid, info.state_set_ids())
			})
			.collect();
		let requester = self.requester.clone();
		let events = self.events.clone();
		tokio::spawn(async move {
			let (mut read, mut applied) = (0, 0);
			for (entry, eid, state_set_ids) in sensors {
				let Some(response) = read_state_sensor(&requester, eid, entry).await else {
					continue;
				};
				read += 1;
				for (offset, field) in (0..=u8::MAX).zip(&response.fields) {
					if !field.is_enabled() {
						let op_state = field.operational_state;
						debug!(sensor_id = entry.sensor_id, offset, op_state, "sensor offset not enabled");
						continue;
					}
					match handler.handle_state_sensor_event(&state_set_ids, entry, offset, field.present_state) {
						StatusCode::Success => applied += 1,
						status => debug!(sensor_id = entry.sensor_id, offset, ?status, "present state rejected"),
					}
				}
			}
			info!(cycle = cycle.0, read, applied, "host sensor states seeded");
			if let Some(events) = events {
				let _ = events.send(DriverEvent::SensorStatesSeeded { cycle, read, applied });
			}
		});
	}
}

async fn read_state_sensor(requester: &Requester, eid: Eid, entry: SensorEntry) -> Option<GetStateSensorReadingsResponse> {
	let request = GetStateSensorReadingsRequest::new(entry.sensor_id);
	let result =
		requester.send_recv(eid, entry.tid, PldmType::Platform, GET_STATE_SENSOR_READINGS, request.encode()).await;
	match result.map(|body| GetStateSensorReadingsResponse::decode(&body)) {
		Ok(Ok(response)) if response.completion_code.is_success() => Some(response),
		Ok(Ok(response)) => {
			let code = response.completion_code;
			warn!(tid = %entry.tid, sensor_id = entry.sensor_id, %code, "host refused sensor reading");
			None
		}
		Ok(Err(e)) => {
			warn!(tid = %entry.tid, sensor_id = entry.sensor_id, error = %e, "undecodable sensor reading");
			None
		}
		Err(e) => {
			warn!(tid = %entry.tid, sensor_id = entry.sensor_id, error = %e, "reading host sensor failed");
			None
		}
	}
}
