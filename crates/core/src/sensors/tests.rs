use parking_lot::Mutex;
use pdrx_proto::{Eid, PdrHeader};
use pretty_assertions::assert_eq;

use super::*;
use crate::terminus::{TerminusInfo, Validity};

const HOST: TerminusId = TerminusId(1);

fn sensor(terminus_handle: u16, sensor_id: u16, states: Vec<(u16, Vec<u8>)>) -> Vec<u8> {
	StateSensorPdr {
		terminus_handle,
		sensor_id,
		entity: Entity::new(135, 0, 3),
		sensor_init: 0,
		has_aux_names: false,
		possible_states: states
			.into_iter()
			.map(|(state_set_id, s)| PossibleStates { state_set_id, states: s.into_iter().collect() })
			.collect(),
	}
	.to_record(0x0100_0000 + sensor_id as u32)
}

#[derive(Default)]
struct RecordingSink {
	changes: Mutex<Vec<SensorStateChange>>,
}

impl SensorEventSink for RecordingSink {
	fn state_changed(&self, change: SensorStateChange) {
		self.changes.lock().push(change);
	}
}

fn handler(map: SensorMap) -> (SensorEventHandler, Arc<RecordingSink>) {
	let index = Arc::new(SensorIndex::new());
	index.publish(map);
	let sink = Arc::new(RecordingSink::default());
	(SensorEventHandler::new(index, sink.clone()), sink)
}

#[test]
fn rebuild_resolves_tid_from_terminus_locators() {
	let termini = TerminusMap::from([(7, TerminusInfo { tid: TerminusId(5), eid: Some(Eid(9)), validity: Validity::Valid })]);
	let records = [sensor(7, 1, vec![(1, vec![1, 2])]), sensor(8, 2, vec![(2, vec![0])])];

	let map = SensorMap::rebuild(records.iter().map(Vec::as_slice), &termini, HOST);
	assert_eq!(map.len(), 2);
	assert!(map.lookup(TerminusId(5), 1).is_some());
	assert!(map.lookup(HOST, 1).is_none());
	assert_eq!(map.lookup(HOST, 2).unwrap().state_set_ids(), vec![2]);
}

#[test]
fn malformed_records_are_skipped() {
	let good = sensor(1, 1, vec![(1, vec![1])]);
	let mut truncated = sensor(1, 2, vec![(1, vec![1])]);
	// claims one more composite block than it carries
	truncated[PdrHeader::LEN + 12] = 2;
	let map = SensorMap::rebuild([good.as_slice(), truncated.as_slice()], &TerminusMap::new(), HOST);
	assert_eq!(map.len(), 1);
	assert!(map.lookup(HOST, 1).is_some());
}

#[test]
fn published_map_replaces_previous_whole() {
	let index = SensorIndex::new();
	let first = SensorMap::rebuild([sensor(1, 1, vec![(1, vec![1])]).as_slice()], &TerminusMap::new(), HOST);
	index.publish(first);
	let reader = index.load();

	let second = SensorMap::rebuild([sensor(1, 2, vec![(1, vec![1])]).as_slice()], &TerminusMap::new(), HOST);
	index.publish(second);

	// a reader holding the old snapshot keeps seeing it
	assert!(reader.lookup(HOST, 1).is_some());
	let now = index.load();
	assert!(now.lookup(HOST, 1).is_none());
	assert!(now.lookup(HOST, 2).is_some());
}

#[test]
fn dispatch_validates_offset_and_state() {
	let map = SensorMap::rebuild([sensor(1, 4, vec![(10, vec![1, 2]), (11, vec![0])]).as_slice()], &TerminusMap::new(), HOST);
	let (handler, sink) = handler(map);

	assert_eq!(handler.dispatch_state_sensor_event(HOST, 4, 1, 0), StatusCode::Success);
	assert_eq!(handler.dispatch_state_sensor_event(HOST, 4, 0, 3), StatusCode::InvalidState);
	assert_eq!(handler.dispatch_state_sensor_event(HOST, 4, 2, 0), StatusCode::InvalidOffset);
	assert_eq!(handler.dispatch_state_sensor_event(HOST, 5, 0, 1), StatusCode::UnknownEntry);
	assert_eq!(handler.dispatch_state_sensor_event(TerminusId(2), 4, 0, 1), StatusCode::UnknownEntry);

	let changes = sink.changes.lock();
	assert_eq!(
		*changes,
		vec![SensorStateChange {
			entry: SensorEntry { tid: HOST, sensor_id: 4 },
			entity: Entity::new(135, 0, 3),
			state_set_id: 11,
			offset: 1,
			state: 0,
		}]
	);
}

#[test]
fn handle_rejects_mismatched_state_set() {
	let map = SensorMap::rebuild([sensor(1, 4, vec![(10, vec![1, 2])]).as_slice()], &TerminusMap::new(), HOST);
	let (handler, sink) = handler(map);
	let entry = SensorEntry { tid: HOST, sensor_id: 4 };

	assert_eq!(handler.handle_state_sensor_event(&[99], entry, 0, 1), StatusCode::InvalidOffset);
	assert_eq!(handler.handle_state_sensor_event(&[10], entry, 0, 2), StatusCode::Success);
	assert_eq!(sink.changes.lock().len(), 1);
}

#[test]
fn status_codes_map_to_completion_codes() {
	assert_eq!(CompletionCode::from(StatusCode::Success), CompletionCode::SUCCESS);
	assert_eq!(CompletionCode::from(StatusCode::UnknownEntry), CompletionCode::INVALID_SENSOR_ID);
	assert_eq!(CompletionCode::from(StatusCode::InvalidState), CompletionCode::INVALID_STATE_VALUE);
}
