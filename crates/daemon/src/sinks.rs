//! Collaborators that report to the log.
//!
//! D-Bus inventory and sensor object projection live outside this daemon;
//! these sinks make merged entities and accepted sensor events visible in the
//! log so an operator (or a log scraper) can follow them.

use pdrx_core::{InventorySink, SensorEventSink, SensorStateChange};
use pdrx_proto::Entity;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogInventory;

impl InventorySink for LogInventory {
	fn node_attached(&self, object_path: &str, entity: Entity) {
		info!(
			object_path,
			entity_type = entity.entity_type,
			instance = entity.instance_number,
			container_id = entity.container_id,
			"inventory object added"
		);
	}

	fn node_detached(&self, object_path: &str, entity: Entity) {
		info!(
			object_path,
			entity_type = entity.entity_type,
			instance = entity.instance_number,
			container_id = entity.container_id,
			"inventory object removed"
		);
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSensorEvents;

impl SensorEventSink for LogSensorEvents {
	fn state_changed(&self, change: SensorStateChange) {
		info!(
			tid = %change.entry.tid,
			sensor_id = change.entry.sensor_id,
			entity_type = change.entity.entity_type,
			instance = change.entity.instance_number,
			state_set_id = change.state_set_id,
			offset = change.offset,
			state = change.state,
			"sensor state changed"
		);
	}
}
