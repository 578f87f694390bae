use pdrx_core::{DriverEvent, ExchangeDriver, HostLink, HostPdrExchange, SensorIndex};
use pdrx_proto::{
	ChangeRecord, Eid, Entity, EntityAssociationPdr, GetPdrResponse, InstanceId, MessageHeader, PdrBody, PdrHeader,
	TERMINATOR, TerminusId,
};
use pdrx_rpc::{InstanceIdDb, Requester, read_frame, write_frame};
use pretty_assertions::assert_eq;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use super::*;
use crate::config::{Config, TopologySeed};
use crate::sinks::LogSensorEvents;
use crate::topology;

const HOST_EID: Eid = Eid(9);

/// The host end of the bridge socket, with the BMC side fully wired up.
struct Bench {
	reader: ReadHalf<DuplexStream>,
	writer: WriteHalf<DuplexStream>,
	driver: DriverHandle,
	events: mpsc::UnboundedReceiver<DriverEvent>,
}

impl Bench {
	fn start(config: &Config) -> Self {
		let (bmc, host) = tokio::io::duplex(4096);
		let (bmc_reader, bmc_writer) = tokio::io::split(bmc);
		let (transport, inbound) = FramedTransport::spawn(bmc_reader, bmc_writer);

		let (repo, tree) = topology::seed(config).unwrap();
		let sensors = Arc::new(SensorIndex::new());
		let engine = HostPdrExchange::new(config.exchange_config(), repo, tree, HostLink::default())
			.with_sensor_index(sensors.clone());
		let requester = Requester::new(transport.clone(), Arc::new(InstanceIdDb::new()), config.requester_config());
		let (driver, handle) = ExchangeDriver::new(engine, requester);
		let (events_tx, events) = mpsc::unbounded_channel();
		tokio::spawn(driver.with_events(events_tx).run());

		let responder = Responder::new(handle.clone(), SensorEventHandler::new(sensors, Arc::new(LogSensorEvents)));
		tokio::spawn(responder.run(transport, inbound));

		let (reader, writer) = tokio::io::split(host);
		Self { reader, writer, driver: handle, events }
	}

	async fn send(&mut self, iid: u8, pldm_type: PldmType, command: u8, payload: Vec<u8>) {
		let header = MessageHeader::request(InstanceId(iid), pldm_type, command);
		write_frame(&mut self.writer, HOST_EID, &PldmMessage::new(header, payload)).await.unwrap();
	}

	async fn recv(&mut self) -> PldmMessage {
		let (eid, message) = read_frame(&mut self.reader).await.unwrap().unwrap();
		assert_eq!(eid, HOST_EID);
		message
	}

	async fn request(&mut self, iid: u8, pldm_type: PldmType, command: u8, payload: Vec<u8>) -> PldmMessage {
		self.send(iid, pldm_type, command, payload).await;
		let response = self.recv().await;
		assert!(!response.header.request);
		assert_eq!(response.header.instance_id, InstanceId(iid));
		response
	}

	async fn reply(&mut self, request: &PldmMessage, body: Vec<u8>) {
		write_frame(&mut self.writer, HOST_EID, &PldmMessage::new(request.header.response(), body)).await.unwrap();
	}
}

fn chassis_config() -> Config {
	Config {
		topology: vec![
			TopologySeed { entity: [11521, 1, 0], parent: None, logical: false },
			TopologySeed { entity: [45, 1, 1], parent: Some([11521, 1, 0]), logical: false },
		],
		..Config::default()
	}
}

fn platform_event(class: EventClass, data: Vec<u8>) -> Vec<u8> {
	PlatformEventRequest::new(TerminusId(1), class, data).encode()
}

#[tokio::test(flavor = "current_thread")]
async fn get_pdr_serves_seeded_records() {
	let mut bench = Bench::start(&chassis_config());
	let response =
		bench.request(1, PldmType::Platform, GET_PDR, GetPdrRequest::first_part(TERMINATOR).encode()).await;
	let response = GetPdrResponse::decode(&response.payload).unwrap();
	assert!(response.completion_code.is_success());
	assert_eq!(response.next_record_handle, TERMINATOR);

	let (header, assoc) = EntityAssociationPdr::decode(&response.record_data).unwrap();
	assert_eq!(header.record_handle, 1);
	assert_eq!(assoc.children, vec![Entity::new(45, 1, 1)]);

	let missing = bench.request(2, PldmType::Platform, GET_PDR, GetPdrRequest::first_part(42).encode()).await;
	assert_eq!(missing.payload, vec![CompletionCode::INVALID_RECORD_HANDLE.0]);
}

#[tokio::test(flavor = "current_thread")]
async fn short_get_pdr_is_invalid_length() {
	let mut bench = Bench::start(&Config::default());
	let response = bench.request(1, PldmType::Platform, GET_PDR, vec![0, 0]).await;
	assert_eq!(response.payload, vec![CompletionCode::ERROR_INVALID_LENGTH.0]);
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_command_is_unsupported() {
	let mut bench = Bench::start(&Config::default());
	let response = bench.request(4, PldmType::Platform, 0x7F, Vec::new()).await;
	assert_eq!(response.payload, vec![CompletionCode::ERROR_UNSUPPORTED_PLDM_CMD.0]);
}

#[tokio::test(flavor = "current_thread")]
async fn event_for_unknown_sensor_is_rejected() {
	let mut bench = Bench::start(&Config::default());
	let event = SensorEvent {
		sensor_id: 40,
		data: SensorEventData::StateSensorState { offset: 0, event_state: 1, previous_event_state: 0 },
	};
	let payload = platform_event(EventClass::Sensor, event.encode());
	let response = bench.request(5, PldmType::Platform, PLATFORM_EVENT_MESSAGE, payload).await;
	let response = PlatformEventResponse::decode(&response.payload).unwrap();
	assert_eq!(response.completion_code, CompletionCode::INVALID_SENSOR_ID);
	assert_eq!(response.status, PlatformEventResponse::NO_LOGGING);
}

#[tokio::test(flavor = "current_thread")]
async fn unhandled_event_class_is_invalid_data() {
	let mut bench = Bench::start(&Config::default());
	let payload = platform_event(EventClass::HeartbeatTimerElapsed, vec![0]);
	let response = bench.request(6, PldmType::Platform, PLATFORM_EVENT_MESSAGE, payload).await;
	let response = PlatformEventResponse::decode(&response.payload).unwrap();
	assert_eq!(response.completion_code, CompletionCode::ERROR_INVALID_DATA);
}

#[tokio::test(flavor = "current_thread")]
async fn refresh_event_resyncs_and_notifies_host() {
	let mut bench = Bench::start(&Config::default());
	let change = RepositoryChangeEvent { format: EventDataFormat::RefreshEntireRepository, records: Vec::new() };
	let payload = platform_event(EventClass::PdrRepositoryChange, change.encode().unwrap());
	bench.send(7, PldmType::Platform, PLATFORM_EVENT_MESSAGE, payload).await;

	let host_record = EntityAssociationPdr {
		container_id: 1,
		association_type: EntityAssociationPdr::PHYSICAL,
		container: Entity::new(11521, 1, 0),
		children: vec![Entity::new(67, 1, 1)],
	}
	.to_record(1);

	// the acknowledgement and the driver's requests interleave freely
	let mut acknowledged = false;
	let notification = loop {
		let message = bench.recv().await;
		match (message.header.request, message.header.command) {
			(false, PLATFORM_EVENT_MESSAGE) => {
				assert_eq!(message.header.instance_id, InstanceId(7));
				let response = PlatformEventResponse::decode(&message.payload).unwrap();
				assert_eq!(response.completion_code, CompletionCode::SUCCESS);
				acknowledged = true;
			}
			(true, GET_PDR) => {
				let request = GetPdrRequest::decode(&message.payload).unwrap();
				assert_eq!(request.record_handle, TERMINATOR);
				let body = GetPdrResponse::single(TERMINATOR, host_record.clone()).encode();
				bench.reply(&message, body).await;
			}
			(true, PLATFORM_EVENT_MESSAGE) => {
				let event = PlatformEventRequest::decode(&message.payload).unwrap();
				let ack = PlatformEventResponse {
					completion_code: CompletionCode::SUCCESS,
					status: PlatformEventResponse::NO_LOGGING,
				};
				bench.reply(&message, ack.encode()).await;
				break RepositoryChangeEvent::decode(&event.event_data).unwrap();
			}
			other => panic!("unexpected message {other:?}"),
		}
	};
	if !acknowledged {
		let message = bench.recv().await;
		assert!(!message.header.request);
		assert_eq!(message.header.instance_id, InstanceId(7));
	}

	// the merged association lands in the local range as a new record
	assert_eq!(notification.format, EventDataFormat::FormatIsPdrHandles);
	assert_eq!(notification.records, vec![ChangeRecord { operation: ChangeOperation::RecordsAdded, entries: vec![1] }]);
	assert!(matches!(bench.events.recv().await, Some(DriverEvent::CycleComplete { notification: Some(_), .. })));

	let served = bench.request(8, PldmType::Platform, GET_PDR, GetPdrRequest::first_part(1).encode()).await;
	let served = GetPdrResponse::decode(&served.payload).unwrap();
	let header = PdrHeader::decode(&served.record_data).unwrap();
	assert_eq!(header.record_handle, 1);

	bench.driver.shutdown().unwrap();
}
