//! Inventory projection seam.
//!
//! Merged host entities are announced to an [`InventorySink`] with the object
//! path the BMC publishes them under. Path segments come from
//! [`EntityNames`].

use std::borrow::Cow;

use pdrx_proto::Entity;
use rustc_hash::FxHashMap;

/// Receives topology nodes created by a merge, and their removal.
pub trait InventorySink: Send + Sync {
	/// Called once per newly created node.
	fn node_attached(&self, object_path: &str, entity: Entity);

	/// Called when a host-created node leaves the topology. Its subtree goes
	/// with it.
	fn node_detached(&self, object_path: &str, entity: Entity) {
		let _ = (object_path, entity);
	}
}

/// Sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInventory;

impl InventorySink for NoopInventory {
	fn node_attached(&self, _object_path: &str, _entity: Entity) {}
}

/// Built-in names for DSP0249 entity types.
const DEFAULT_NAMES: &[(u16, &str)] = &[
	(29, "fan"),
	(45, "chassis"),
	(60, "board"),
	(64, "motherboard"),
	(66, "dimm"),
	(67, "dcm"),
	(120, "powersupply"),
	(135, "cpu"),
	(136, "core"),
	(144, "slot"),
	(145, "connector"),
	(11521, "system"),
];

/// Entity type to path segment name mapping.
#[derive(Debug, Clone, Default)]
pub struct EntityNames {
	overrides: FxHashMap<u16, String>,
}

impl EntityNames {
	/// Names with overrides on top of the built-in table.
	pub fn with_overrides(overrides: impl IntoIterator<Item = (u16, String)>) -> Self {
		Self { overrides: overrides.into_iter().collect() }
	}

	/// Name for `entity_type`; `entity{type}` when it has none.
	pub fn name(&self, entity_type: u16) -> Cow<'_, str> {
		if let Some(name) = self.overrides.get(&entity_type) {
			return Cow::Borrowed(name);
		}
		match DEFAULT_NAMES.iter().find(|(ty, _)| *ty == entity_type) {
			Some((_, name)) => Cow::Borrowed(name),
			None => Cow::Owned(format!("entity{entity_type}")),
		}
	}
}
