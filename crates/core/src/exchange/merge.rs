//! Folding host entity association records into the BMC topology.

use pdrx_proto::{Entity, EntityAssociationPdr, RecordHandle};
use tracing::{debug, warn};

use super::{HostPdrExchange, ImportedRecord};
use crate::repo::{Origin, RepoError};
use crate::tree::{Attach, Locality, TreeError};

impl HostPdrExchange {
	/// Merges one host association record.
	///
	/// The first record of a cycle finds its parent by type and instance only,
	/// since the host numbers its root relative to the BMC attachment point.
	/// Later records must name a node exactly, so they land under the node the
	/// earlier records created. Children go into the tree and into the BMC's
	/// association record for the parent.
	pub(super) fn merge(&mut self, host_handle: RecordHandle, assoc: EntityAssociationPdr) -> Result<(), RepoError> {
		let first = self.pending.as_ref().is_some_and(|p| !p.merged_first_parent);
		let locality = if first { Locality::Relaxed } else { Locality::Exact };
		let Some((parent_id, parent)) =
			self.tree.find(&assoc.container, locality).and_then(|id| Some((id, self.tree.entity(id)?)))
		else {
			warn!(host_handle, container = ?assoc.container, ?locality, "association parent not modelled, skipping children");
			self.stats.records_skipped += 1;
			return Ok(());
		};
		if let Some(pending) = self.pending.as_mut() {
			pending.merged_first_parent = true;
		}

		let mut children = Vec::with_capacity(assoc.children.len());
		let mut bmc_handle = None;
		for child in assoc.children {
			let created = match self.tree.attach_child(parent_id, child, Origin::Host) {
				Ok(Attach::Created(id)) => {
					if let Some(path) = self.tree.object_path(id, &self.names, &self.config.inventory_root) {
						self.inventory.node_attached(&path, child);
					}
					true
				}
				Ok(Attach::Existing(_)) => false,
				Err(TreeError::AttachedElsewhere { entity, parent: other }) => {
					warn!(host_handle, ?entity, ?other, "entity already attached elsewhere, skipping");
					continue;
				}
				Err(e @ TreeError::UnknownNode(_)) => {
					warn!(host_handle, error = %e, "association parent vanished mid-merge");
					break;
				}
			};
			let (handle, changed) = self.repo.associate(parent, assoc.association_type, child)?;
			if changed && let Some(pending) = self.pending.as_mut() {
				pending.accumulated_changed_handles.insert(handle);
			}
			// children the BMC already modelled and recorded stay BMC-owned
			if created || changed {
				bmc_handle = Some(handle);
				children.push(child);
			}
		}

		self.stats.associations_merged += 1;
		if let Some(bmc_handle) = bmc_handle {
			debug!(host_handle, bmc_handle, children = children.len(), "merged host association");
			self.imports.insert(host_handle, ImportedRecord::Merged { parent, children, bmc_handle });
		}
		Ok(())
	}

	/// Undoes the merge of `child` into the association record `bmc_handle`.
	///
	/// A host-created node is detached with its subtree and every removed
	/// entity is stripped from the BMC association records. A BMC-owned node
	/// stays in the tree; only the listing the merge appended to `bmc_handle`
	/// is taken back. Returns the handles that changed or disappeared.
	pub(super) fn unmerge(&mut self, bmc_handle: RecordHandle, child: Entity) -> Result<Vec<RecordHandle>, RepoError> {
		let Some(id) = self.tree.find(&child, Locality::Exact) else {
			debug!(?child, "merged entity already left the topology");
			return Ok(Vec::new());
		};
		let mut touched = Vec::new();
		match self.tree.origin(id) {
			Some(Origin::Host) => {
				if let Some(path) = self.tree.object_path(id, &self.names, &self.config.inventory_root) {
					self.inventory.node_detached(&path, child);
				}
				let local = self.config.local_range;
				for entity in self.tree.detach(id) {
					touched.extend(self.repo.strip_entity(entity, local)?);
				}
			}
			_ => {
				if self.repo.get(bmc_handle).is_some() && self.repo.remove_contained_entity(bmc_handle, child)? {
					touched.push(bmc_handle);
				}
			}
		}
		debug!(?child, bmc_handle, records = touched.len(), "unmerged host entity");
		Ok(touched)
	}
}
