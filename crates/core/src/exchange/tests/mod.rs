//! Exchange cycle tests driven against a scripted host repository.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use pdrx_proto::{PossibleStates, StateEffecterPdr};

use super::*;
use crate::tree::{Locality, NodeId};


const SYSTEM: Entity = Entity::new(11521, 1, 0);
const CHASSIS: Entity = Entity::new(45, 1, 1);
const DCM: Entity = Entity::new(67, 1, 0x10);
const CPU: Entity = Entity::new(135, 1, 0x11);

/// Host-side repository answering GetPDR out of a fixed record list.
struct FakeHost {
	records: Vec<(RecordHandle, Vec<u8>)>,
	next_overrides: BTreeMap<RecordHandle, RecordHandle>,
}

impl FakeHost {
	fn new(records: Vec<Vec<u8>>) -> Self {
		let records = records
			.into_iter()
			.map(|r| (PdrHeader::decode(&r).unwrap().record_handle, r))
			.collect();
		Self { records, next_overrides: BTreeMap::new() }
	}

	fn respond(&self, handle: RecordHandle) -> Vec<u8> {
		let position = match handle {
			TERMINATOR => Some(0).filter(|_| !self.records.is_empty()),
			h => self.records.iter().position(|(rh, _)| *rh == h),
		};
		let Some(position) = position else {
			return GetPdrResponse { completion_code: CompletionCode::INVALID_RECORD_HANDLE, ..GetPdrResponse::single(0, vec![]) }
				.encode();
		};
		let (own, record) = &self.records[position];
		let next = self
			.next_overrides
			.get(own)
			.copied()
			.unwrap_or_else(|| self.records.get(position + 1).map_or(TERMINATOR, |(h, _)| *h));
		GetPdrResponse::single(next, record.clone()).encode()
	}
}

#[derive(Default)]
struct RecordingInventory {
	attached: Mutex<Vec<(String, Entity)>>,
	detached: Mutex<Vec<(String, Entity)>>,
}

impl InventorySink for RecordingInventory {
	fn node_attached(&self, object_path: &str, entity: Entity) {
		self.attached.lock().push((object_path.to_string(), entity));
	}

	fn node_detached(&self, object_path: &str, entity: Entity) {
		self.detached.lock().push((object_path.to_string(), entity));
	}
}

fn assoc(handle: RecordHandle, container: Entity, children: &[Entity]) -> Vec<u8> {
	EntityAssociationPdr {
		container_id: children.first().map_or(0, |c| c.container_id),
		association_type: EntityAssociationPdr::PHYSICAL,
		container,
		children: children.to_vec(),
	}
	.to_record(handle)
}

fn state_sensor(handle: RecordHandle, terminus_handle: u16, sensor_id: u16) -> Vec<u8> {
	StateSensorPdr {
		terminus_handle,
		sensor_id,
		entity: CPU,
		sensor_init: 0,
		has_aux_names: false,
		possible_states: vec![PossibleStates { state_set_id: 1, states: [1, 2].into() }],
	}
	.to_record(handle)
}

/// A record type the engine passes through untouched.
fn numeric_sensor(handle: RecordHandle) -> Vec<u8> {
	let body = [0xAAu8; 12];
	let mut out = Vec::new();
	PdrHeader {
		record_handle: handle,
		version: PdrHeader::VERSION,
		pdr_type: PdrType::NumericSensor,
		record_change_number: 0,
		data_length: body.len() as u16,
	}
	.encode(&mut out);
	out.extend_from_slice(&body);
	out
}

fn locator(handle: RecordHandle, terminus_handle: u16, tid: u8) -> Vec<u8> {
	TerminusLocatorPdr {
		terminus_handle,
		valid: true,
		tid: TerminusId(tid),
		container_id: 0,
		locator: pdrx_proto::TerminusLocator::MctpEid(Eid(9)),
	}
	.to_record(handle)
}

fn local_effecter(effecter_id: u16) -> Vec<u8> {
	StateEffecterPdr {
		terminus_handle: 0,
		effecter_id,
		entity: DCM,
		effecter_semantic_id: 0,
		effecter_init: 0,
		has_description_pdr: false,
		possible_states: vec![PossibleStates { state_set_id: 196, states: [1, 2].into() }],
	}
	.to_record(TERMINATOR)
}

/// BMC with a lone system root and an empty repository.
fn bmc() -> (HostPdrExchange, NodeId) {
	bmc_with(ExchangeConfig::default(), PdrRepo::default(), |_| {})
}

fn bmc_with(
	config: ExchangeConfig,
	repo: PdrRepo,
	topology: impl FnOnce(&mut EntityTree),
) -> (HostPdrExchange, NodeId) {
	let mut tree = EntityTree::new();
	let root = tree.add_root(SYSTEM, Origin::Local).id();
	topology(&mut tree);
	(HostPdrExchange::new(config, repo, tree, HostLink::default()), root)
}

/// Runs the current cycle to completion against `host`.
fn drive(engine: &mut HostPdrExchange, host: &FakeHost) -> Result<Option<ChangeNotification>, ExchangeError> {
	loop {
		let request = engine.next_request()?.expect("cycle stalled with nothing in flight");
		match engine.on_response(request.cycle, Ok(host.respond(request.record_handle)))? {
			ResponseOutcome::Continue => {}
			ResponseOutcome::Complete(notification) => return Ok(notification),
			ResponseOutcome::Stale => panic!("own response reported stale"),
		}
	}
}

fn resync(engine: &mut HostPdrExchange, host: &FakeHost) -> Result<Option<ChangeNotification>, ExchangeError> {
	engine.begin_resync();
	drive(engine, host)
}

/// Host repository of the basic scenario: one association under the system
/// root, one pass-through record, one state sensor.
fn basic_host() -> FakeHost {
	FakeHost::new(vec![
		assoc(1, Entity::new(11521, 1, 0x7777), &[DCM]),
		numeric_sensor(2),
		state_sensor(3, 1, 40),
	])
}
