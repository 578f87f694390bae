//! Answers requests the host initiates.
//!
//! Sensor events go to the sensor event handler, PDR repository change
//! events become resync, fetch or delete triggers for the exchange driver,
//! and GetPDR is served out of the BMC repository. Everything else gets
//! `ERROR_UNSUPPORTED_PLDM_CMD`.

use std::sync::Arc;

use pdrx_core::{DriverClosed, DriverHandle, SensorEventHandler};
use pdrx_proto::platform::{GET_PDR, PLATFORM_EVENT_MESSAGE};
use pdrx_proto::{
	ChangeOperation, CompletionCode, EventClass, EventDataFormat, GetPdrRequest, PldmType, PlatformEventRequest,
	PlatformEventResponse, RepositoryChangeEvent, SensorEvent, SensorEventData,
};
use pdrx_rpc::{FramedTransport, InboundRequest, PldmMessage, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Responder {
	driver: DriverHandle,
	sensors: SensorEventHandler,
}

impl Responder {
	pub fn new(driver: DriverHandle, sensors: SensorEventHandler) -> Self {
		Self { driver, sensors }
	}

	/// Serves `inbound` until the transport closes.
	pub async fn run(self, transport: Arc<FramedTransport>, mut inbound: mpsc::Receiver<InboundRequest>) {
		while let Some(InboundRequest { eid, message }) = inbound.recv().await {
			let body = self.handle(&message).await;
			let response = PldmMessage::new(message.header.response(), body);
			match transport.send(eid, response).await {
				Ok(()) => {}
				Err(TransportError::Closed) => break,
				Err(e) => warn!(%eid, error = %e, "sending response failed"),
			}
		}
		debug!("responder stopped");
	}

	/// Response body for one host request.
	pub async fn handle(&self, request: &PldmMessage) -> Vec<u8> {
		let header = request.header;
		match (header.pldm_type, header.command) {
			(PldmType::Platform, PLATFORM_EVENT_MESSAGE) => {
				let completion_code = self.platform_event(&request.payload);
				PlatformEventResponse { completion_code, status: PlatformEventResponse::NO_LOGGING }.encode()
			}
			(PldmType::Platform, GET_PDR) => match GetPdrRequest::decode(&request.payload) {
				Ok(get) => match self.driver.serve_get_pdr(get).await {
					Ok(response) => response.encode(),
					Err(DriverClosed) => vec![CompletionCode::ERROR_NOT_READY.0],
				},
				Err(e) => {
					debug!(error = %e, "malformed GetPDR request");
					vec![CompletionCode::ERROR_INVALID_LENGTH.0]
				}
			},
			(pldm_type, command) => {
				debug!(?pldm_type, command, "unsupported host request");
				vec![CompletionCode::ERROR_UNSUPPORTED_PLDM_CMD.0]
			}
		}
	}

	fn platform_event(&self, payload: &[u8]) -> CompletionCode {
		let event = match PlatformEventRequest::decode(payload) {
			Ok(event) => event,
			Err(e) => {
				debug!(error = %e, "malformed platform event");
				return CompletionCode::ERROR_INVALID_LENGTH;
			}
		};
		match event.event_class {
			EventClass::Sensor => match SensorEvent::decode(&event.event_data) {
				Ok(SensorEvent { sensor_id, data: SensorEventData::StateSensorState { offset, event_state, .. } }) => {
					self.sensors.dispatch_state_sensor_event(event.tid, sensor_id, offset, event_state).into()
				}
				Ok(SensorEvent { sensor_id, data: SensorEventData::Other { class, .. } }) => {
					debug!(tid = %event.tid, sensor_id, class, "ignoring non-state sensor event");
					CompletionCode::SUCCESS
				}
				Err(e) => {
					debug!(error = %e, "malformed sensor event");
					CompletionCode::ERROR_INVALID_DATA
				}
			},
			EventClass::PdrRepositoryChange => match RepositoryChangeEvent::decode(&event.event_data) {
				Ok(change) => match self.repository_changed(change) {
					Ok(()) => CompletionCode::SUCCESS,
					Err(DriverClosed) => CompletionCode::ERROR_NOT_READY,
				},
				Err(e) => {
					debug!(error = %e, "malformed repository change event");
					CompletionCode::ERROR_INVALID_DATA
				}
			},
			other => {
				debug!(?other, "unhandled event class");
				CompletionCode::ERROR_INVALID_DATA
			}
		}
	}

	fn repository_changed(&self, change: RepositoryChangeEvent) -> Result<(), DriverClosed> {
		if change.format != EventDataFormat::FormatIsPdrHandles {
			info!(format = ?change.format, "host repository changed, resyncing");
			return self.driver.resync();
		}
		for record in change.records {
			debug!(operation = ?record.operation, entries = record.entries.len(), "host repository change");
			match record.operation {
				ChangeOperation::RefreshAllRecords => self.driver.resync()?,
				ChangeOperation::RecordsDeleted => self.driver.delete(record.entries)?,
				// modified records are replaced when fetched again
				ChangeOperation::RecordsAdded | ChangeOperation::RecordsModified => self.driver.fetch(record.entries)?,
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests;
