//! State sensor index and event dispatch.
//!
//! [`SensorMap`] is an immutable snapshot keyed by `(terminus id, sensor id)`
//! built from the host's state sensor records. [`SensorIndex`] publishes
//! snapshots through an `ArcSwap`: a rebuild happens off to the side and
//! replaces the previous map in one store, so event dispatch never observes
//! a half-built index.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use pdrx_proto::{CompletionCode, Entity, PdrBody, PossibleStates, StateSensorPdr, TerminusId};

use crate::terminus::TerminusMap;

/// Composite key of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorEntry {
	/// Terminus owning the sensor.
	pub tid: TerminusId,
	/// Sensor id within the terminus.
	pub sensor_id: u16,
}

/// What the BMC knows about one state sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
	/// Monitored entity.
	pub entity: Entity,
	/// One block per composite sensor offset.
	pub possible_states: Vec<PossibleStates>,
}

impl SensorInfo {
	/// State set ids in offset order.
	pub fn state_set_ids(&self) -> Vec<u16> {
		self.possible_states.iter().map(|p| p.state_set_id).collect()
	}
}

/// Immutable sensor lookup table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorMap {
	entries: BTreeMap<SensorEntry, SensorInfo>,
}

impl SensorMap {
	/// Builds a map from encoded state sensor records.
	///
	/// The terminus id comes from the terminus locator with the record's
	/// terminus handle, or `default_tid` when no locator is known. Malformed
	/// records are skipped.
	pub fn rebuild<'a>(
		records: impl IntoIterator<Item = &'a [u8]>,
		termini: &TerminusMap,
		default_tid: TerminusId,
	) -> Self {
		let mut entries = BTreeMap::new();
		for bytes in records {
			let sensor = match StateSensorPdr::decode(bytes) {
				Ok((_, sensor)) => sensor,
				Err(e) => {
					tracing::warn!(error = %e, "skipping malformed state sensor record");
					continue;
				}
			};
			let tid = termini.get(&sensor.terminus_handle).map_or(default_tid, |t| t.tid);
			let entry = SensorEntry { tid, sensor_id: sensor.sensor_id };
			let info = SensorInfo { entity: sensor.entity, possible_states: sensor.possible_states };
			if entries.insert(entry, info).is_some() {
				tracing::warn!(%tid, sensor_id = entry.sensor_id, "duplicate state sensor, keeping the later record");
			}
		}
		Self { entries }
	}

	/// Sensor info for `(tid, sensor_id)`.
	pub fn lookup(&self, tid: TerminusId, sensor_id: u16) -> Option<&SensorInfo> {
		self.entries.get(&SensorEntry { tid, sensor_id })
	}

	/// Number of sensors.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns true when no sensor is known.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Entries in key order.
	pub fn iter(&self) -> impl Iterator<Item = (&SensorEntry, &SensorInfo)> {
		self.entries.iter()
	}
}

/// Atomically replaced [`SensorMap`].
#[derive(Debug, Default)]
pub struct SensorIndex {
	current: ArcSwap<SensorMap>,
}

impl SensorIndex {
	/// Creates an index holding an empty map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Current map.
	pub fn load(&self) -> Arc<SensorMap> {
		self.current.load_full()
	}

	/// Replaces the current map.
	pub fn publish(&self, map: SensorMap) {
		self.current.store(Arc::new(map));
	}
}

/// Outcome of a state sensor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
	/// The event was accepted.
	Success,
	/// No sensor with that key is known.
	UnknownEntry,
	/// The composite offset is beyond the sensor's state sets.
	InvalidOffset,
	/// The state is not a possible state of that offset.
	InvalidState,
}

impl From<StatusCode> for CompletionCode {
	fn from(status: StatusCode) -> Self {
		match status {
			StatusCode::Success => CompletionCode::SUCCESS,
			StatusCode::UnknownEntry => CompletionCode::INVALID_SENSOR_ID,
			StatusCode::InvalidOffset => CompletionCode::ERROR_INVALID_DATA,
			StatusCode::InvalidState => CompletionCode::INVALID_STATE_VALUE,
		}
	}
}

/// A validated sensor state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorStateChange {
	/// Sensor that changed.
	pub entry: SensorEntry,
	/// Monitored entity.
	pub entity: Entity,
	/// State set of the changed offset.
	pub state_set_id: u16,
	/// Composite sensor offset.
	pub offset: u8,
	/// New state.
	pub state: u8,
}

/// Receives validated sensor state changes.
pub trait SensorEventSink: Send + Sync {
	/// Called once per accepted event.
	fn state_changed(&self, change: SensorStateChange);
}

/// Validates sensor events against the published index and forwards them.
#[derive(Clone)]
pub struct SensorEventHandler {
	index: Arc<SensorIndex>,
	sink: Arc<dyn SensorEventSink>,
}

impl std::fmt::Debug for SensorEventHandler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SensorEventHandler").field("sensors", &self.index.load().len()).finish_non_exhaustive()
	}
}

impl SensorEventHandler {
	/// Creates a handler reading `index` and reporting to `sink`.
	pub fn new(index: Arc<SensorIndex>, sink: Arc<dyn SensorEventSink>) -> Self {
		Self { index, sink }
	}

	/// Handles a state change of `entry` at `offset`, given the caller's view
	/// of the sensor's state sets.
	pub fn handle_state_sensor_event(
		&self,
		state_set_ids: &[u16],
		entry: SensorEntry,
		offset: u8,
		new_state: u8,
	) -> StatusCode {
		let map = self.index.load();
		let Some(info) = map.lookup(entry.tid, entry.sensor_id) else {
			tracing::debug!(tid = %entry.tid, sensor_id = entry.sensor_id, "state sensor event for unknown sensor");
			return StatusCode::UnknownEntry;
		};
		let (Some(&state_set_id), Some(states)) =
			(state_set_ids.get(offset as usize), info.possible_states.get(offset as usize))
		else {
			return StatusCode::InvalidOffset;
		};
		if states.state_set_id != state_set_id {
			return StatusCode::InvalidOffset;
		}
		if !states.states.contains(&new_state) {
			return StatusCode::InvalidState;
		}
		self.sink.state_changed(SensorStateChange {
			entry,
			entity: info.entity,
			state_set_id,
			offset,
			state: new_state,
		});
		StatusCode::Success
	}

	/// Handles a state sensor event reported by `tid`, resolving the sensor's
	/// state sets from the index.
	pub fn dispatch_state_sensor_event(&self, tid: TerminusId, sensor_id: u16, offset: u8, event_state: u8) -> StatusCode {
		let entry = SensorEntry { tid, sensor_id };
		let state_set_ids = match self.index.load().lookup(tid, sensor_id) {
			Some(info) => info.state_set_ids(),
			None => return StatusCode::UnknownEntry,
		};
		self.handle_state_sensor_event(&state_set_ids, entry, offset, event_state)
	}
}

#[cfg(test)]
mod tests;
