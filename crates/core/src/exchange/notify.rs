//! Change notification computed at the end of a cycle.

use std::collections::{BTreeMap, BTreeSet};

use pdrx_proto::{
	ChangeOperation, ChangeRecord, DecodeError, EventClass, EventDataFormat, PlatformEventRequest, RecordHandle,
	RepositoryChangeEvent, TerminusId,
};

use crate::repo::PdrRepo;

/// Entries one change record can carry.
const MAX_ENTRIES: usize = u8::MAX as usize;

/// BMC record handles a cycle added, modified or deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotification {
	/// Handles that did not exist before the cycle.
	pub added: Vec<RecordHandle>,
	/// Handles whose bytes differ from before the cycle.
	pub modified: Vec<RecordHandle>,
	/// Handles that existed before the cycle and are gone.
	pub deleted: Vec<RecordHandle>,
}

impl ChangeNotification {
	/// Returns true when nothing changed.
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
	}

	/// Repository change event data in handle format.
	pub fn to_change_event(&self) -> RepositoryChangeEvent {
		let mut records = Vec::new();
		for (operation, handles) in [
			(ChangeOperation::RecordsAdded, &self.added),
			(ChangeOperation::RecordsModified, &self.modified),
			(ChangeOperation::RecordsDeleted, &self.deleted),
		] {
			records.extend(
				handles.chunks(MAX_ENTRIES).map(|chunk| ChangeRecord { operation, entries: chunk.to_vec() }),
			);
		}
		RepositoryChangeEvent { format: EventDataFormat::FormatIsPdrHandles, records }
	}

	/// PlatformEventMessage request announcing the change from `bmc_tid`.
	pub fn to_event(&self, bmc_tid: TerminusId) -> Result<PlatformEventRequest, DecodeError> {
		let data = self.to_change_event().encode()?;
		Ok(PlatformEventRequest::new(bmc_tid, EventClass::PdrRepositoryChange, data))
	}
}

/// Classifies `touched` against the pre-cycle `snapshot`.
///
/// Handles gone from the repository are reported deleted when the snapshot
/// had them and left out otherwise. Handles whose bytes are unchanged are
/// left out too, so re-importing identical data yields an empty
/// notification.
pub(super) fn change_set(
	repo: &PdrRepo,
	snapshot: &BTreeMap<RecordHandle, Vec<u8>>,
	touched: &BTreeSet<RecordHandle>,
) -> ChangeNotification {
	let mut notification = ChangeNotification::default();
	for &handle in touched {
		let Some(record) = repo.get(handle) else {
			if snapshot.contains_key(&handle) {
				notification.deleted.push(handle);
			}
			continue;
		};
		match snapshot.get(&handle) {
			None => notification.added.push(handle),
			Some(before) if before.as_slice() != record.bytes() => notification.modified.push(handle),
			Some(_) => {}
		}
	}
	notification
}
