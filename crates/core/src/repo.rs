//! In-memory PDR repository.
//!
//! Records are keyed by handle in a `BTreeMap`, so iteration order is handle
//! order and range queries are cheap. Two disjoint [`HandleRange`]s split the
//! handle space between records the BMC generates and records imported from
//! the host. Every stored record's header handle equals its key and its
//! declared length fits inside its bytes; [`PdrRepo::insert`] enforces both.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use pdrx_proto::pdr::set_record_handle;
use pdrx_proto::{
	DecodeError, Entity, EntityAssociationPdr, HandleRange, PdrBody, PdrHeader, PdrType, RecordHandle,
	StateEffecterPdr, TerminusLocatorPdr,
};

/// Who produced a record or topology node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
	/// Generated by the BMC.
	Local,
	/// Imported from the host.
	Host,
}

/// Repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
	/// Every handle of the origin's range is taken.
	#[error("no free record handle in {0}")]
	HandleSpaceExhausted(HandleRange),
	/// The record bytes are not a well-formed PDR.
	#[error("malformed record: {0}")]
	Decode(#[from] DecodeError),
	/// No record carries the handle.
	#[error("no record with handle {0:#x}")]
	UnknownHandle(RecordHandle),
	/// The association record already lists the maximum number of children.
	#[error("association record {0:#x} cannot hold more children")]
	AssociationFull(RecordHandle),
}

/// One stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdrRecord {
	handle: RecordHandle,
	pdr_type: PdrType,
	origin: Origin,
	bytes: Vec<u8>,
}

impl PdrRecord {
	/// Record handle, equal to the handle in the header.
	pub fn handle(&self) -> RecordHandle {
		self.handle
	}

	/// Record type from the header.
	pub fn pdr_type(&self) -> PdrType {
		self.pdr_type
	}

	/// Producer of the record.
	pub fn origin(&self) -> Origin {
		self.origin
	}

	/// Encoded record, header included.
	pub fn bytes(&self) -> &[u8] {
		&self.bytes
	}
}

/// The BMC's PDR repository.
#[derive(Debug, Clone)]
pub struct PdrRepo {
	records: BTreeMap<RecordHandle, PdrRecord>,
	local: HandleRange,
	host: HandleRange,
}

impl Default for PdrRepo {
	fn default() -> Self {
		Self::new(HandleRange::LOCAL, HandleRange::HOST)
	}
}

impl PdrRepo {
	/// Creates an empty repository. The ranges must not overlap.
	pub fn new(local: HandleRange, host: HandleRange) -> Self {
		debug_assert!(!local.overlaps(&host), "handle ranges overlap: {local} / {host}");
		Self { records: BTreeMap::new(), local, host }
	}

	/// Handle range owned by `origin`.
	pub fn range(&self, origin: Origin) -> HandleRange {
		match origin {
			Origin::Local => self.local,
			Origin::Host => self.host,
		}
	}

	/// Number of stored records.
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Returns true when the repository holds no records.
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Record with `handle`.
	pub fn get(&self, handle: RecordHandle) -> Option<&PdrRecord> {
		self.records.get(&handle)
	}

	/// All records in handle order.
	pub fn iter(&self) -> impl Iterator<Item = &PdrRecord> {
		self.records.values()
	}

	/// Records of one type in handle order.
	pub fn iter_by_type(&self, pdr_type: PdrType) -> impl Iterator<Item = &PdrRecord> {
		self.records.values().filter(move |r| r.pdr_type == pdr_type)
	}

	/// Records whose handles lie in `range`.
	pub fn iter_range(&self, range: HandleRange) -> impl Iterator<Item = &PdrRecord> {
		self.records.range(range.as_range()).map(|(_, r)| r)
	}

	/// Highest handle in use inside `range`.
	pub fn find_last_handle_in_range(&self, range: HandleRange) -> Option<RecordHandle> {
		self.records.range(range.as_range()).next_back().map(|(h, _)| *h)
	}

	/// First record and the handle of the one after it, for GetPDR serving.
	///
	/// `handle` 0 addresses the first record. The returned next handle is
	/// [`pdrx_proto::TERMINATOR`] after the last record.
	pub fn get_with_next(&self, handle: RecordHandle) -> Option<(&PdrRecord, RecordHandle)> {
		let record = match handle {
			pdrx_proto::TERMINATOR => self.records.values().next()?,
			handle => self.records.get(&handle)?,
		};
		let next = self
			.records
			.range((Bound::Excluded(record.handle), Bound::Unbounded))
			.next()
			.map_or(pdrx_proto::TERMINATOR, |(h, _)| *h);
		Some((record, next))
	}

	fn next_free(&self, range: HandleRange) -> Option<RecordHandle> {
		match self.find_last_handle_in_range(range) {
			None => Some(range.start),
			Some(last) if last < range.end => Some(last + 1),
			Some(_) => range.as_range().find(|h| !self.records.contains_key(h)),
		}
	}

	/// Stores a record produced by `origin` and returns its handle.
	///
	/// The handle is the next free one in the origin's range and is written
	/// into the record header. Host records keep their own handle when it
	/// already lies in the host range and is free, so handles stay stable
	/// across resyncs.
	pub fn insert(&mut self, origin: Origin, mut bytes: Vec<u8>) -> Result<RecordHandle, RepoError> {
		let (header, _) = PdrHeader::split(&bytes)?;
		let range = self.range(origin);
		let keep = origin == Origin::Host
			&& range.contains(header.record_handle)
			&& !self.records.contains_key(&header.record_handle);
		let handle = if keep {
			header.record_handle
		} else {
			self.next_free(range).ok_or(RepoError::HandleSpaceExhausted(range))?
		};
		set_record_handle(&mut bytes, handle)?;
		self.records.insert(handle, PdrRecord { handle, pdr_type: header.pdr_type, origin, bytes });
		Ok(handle)
	}

	/// Removes the listed records and returns them. Unknown handles are ignored.
	pub fn delete_by_handles(&mut self, handles: &BTreeSet<RecordHandle>) -> Vec<PdrRecord> {
		handles.iter().filter_map(|h| self.records.remove(h)).collect()
	}

	/// Removes every record whose handle lies in `range`.
	pub fn delete_range(&mut self, range: HandleRange) -> Vec<PdrRecord> {
		let handles: BTreeSet<_> = self.records.range(range.as_range()).map(|(h, _)| *h).collect();
		self.delete_by_handles(&handles)
	}

	/// Copy of every record's bytes, for change detection.
	pub fn content_snapshot(&self) -> BTreeMap<RecordHandle, Vec<u8>> {
		self.records.iter().map(|(h, r)| (*h, r.bytes.clone())).collect()
	}

	fn associations_in(&self, range: HandleRange) -> impl Iterator<Item = (RecordHandle, EntityAssociationPdr)> + '_ {
		self.iter_range(range)
			.filter(|r| r.pdr_type == PdrType::EntityAssociation)
			.filter_map(|r| EntityAssociationPdr::decode(&r.bytes).ok().map(|(_, body)| (r.handle, body)))
	}

	/// Association record in `range` whose container entity is `parent`.
	pub fn find_association_for_parent(
		&self,
		parent: &Entity,
		association_type: u8,
		range: HandleRange,
	) -> Option<RecordHandle> {
		self.associations_in(range)
			.find(|(_, assoc)| assoc.container == *parent && assoc.association_type == association_type)
			.map(|(handle, _)| handle)
	}

	fn rewrite_association(
		&mut self,
		handle: RecordHandle,
		edit: impl FnOnce(&mut EntityAssociationPdr) -> Result<bool, RepoError>,
	) -> Result<bool, RepoError> {
		let record = self.records.get_mut(&handle).ok_or(RepoError::UnknownHandle(handle))?;
		let (header, mut assoc) = EntityAssociationPdr::decode(&record.bytes)?;
		if !edit(&mut assoc)? {
			return Ok(false);
		}
		let mut bytes = assoc.to_record(handle);
		// keep the change number the producer assigned
		bytes[6..8].copy_from_slice(&header.record_change_number.to_le_bytes());
		record.bytes = bytes;
		Ok(true)
	}

	/// Appends `child` to an association record. Returns false when it is already listed.
	pub fn add_contained_entity(&mut self, handle: RecordHandle, child: Entity) -> Result<bool, RepoError> {
		self.rewrite_association(handle, |assoc| {
			if assoc.children.contains(&child) {
				return Ok(false);
			}
			if assoc.children.len() == u8::MAX as usize {
				return Err(RepoError::AssociationFull(handle));
			}
			assoc.children.push(child);
			Ok(true)
		})
	}

	/// Removes `child` from an association record. Returns false when it was not listed.
	///
	/// A record left without children is deleted.
	pub fn remove_contained_entity(&mut self, handle: RecordHandle, child: Entity) -> Result<bool, RepoError> {
		let mut emptied = false;
		let changed = self.rewrite_association(handle, |assoc| {
			let before = assoc.children.len();
			assoc.children.retain(|c| *c != child);
			emptied = assoc.children.is_empty();
			Ok(assoc.children.len() != before)
		})?;
		if changed && emptied {
			self.records.remove(&handle);
		}
		Ok(changed)
	}

	/// Removes `entity` from every association record in `range`, as a child
	/// or as the container. Returns the handles of records that changed or
	/// were deleted.
	pub fn strip_entity(&mut self, entity: Entity, range: HandleRange) -> Result<Vec<RecordHandle>, RepoError> {
		let mut touched = Vec::new();
		let hits: Vec<_> = self
			.associations_in(range)
			.filter(|(_, assoc)| assoc.container == entity || assoc.children.contains(&entity))
			.map(|(handle, assoc)| (handle, assoc.container == entity))
			.collect();
		for (handle, is_container) in hits {
			if is_container {
				self.records.remove(&handle);
				touched.push(handle);
			} else if self.remove_contained_entity(handle, entity)? {
				touched.push(handle);
			}
		}
		Ok(touched)
	}

	/// Creates a local association record for `parent` containing `child`.
	///
	/// The record gets the next handle after the BMC's last local record.
	pub fn create_association(
		&mut self,
		parent: Entity,
		association_type: u8,
		child: Entity,
	) -> Result<RecordHandle, RepoError> {
		let assoc = EntityAssociationPdr {
			container_id: child.container_id,
			association_type,
			container: parent,
			children: vec![child],
		};
		self.insert(Origin::Local, assoc.to_record(pdrx_proto::TERMINATOR))
	}

	/// Records `child` under `parent` in the local association records,
	/// extending the existing record for `parent` or creating one.
	///
	/// Returns the record handle and whether the repository changed.
	pub fn associate(
		&mut self,
		parent: Entity,
		association_type: u8,
		child: Entity,
	) -> Result<(RecordHandle, bool), RepoError> {
		match self.find_association_for_parent(&parent, association_type, self.local) {
			Some(handle) => Ok((handle, self.add_contained_entity(handle, child)?)),
			None => Ok((self.create_association(parent, association_type, child)?, true)),
		}
	}

	/// Container id recorded for the entity `(entity_type, instance)` by the
	/// association records in `range`.
	pub fn find_container_id(&self, entity_type: u16, instance: u16, range: HandleRange) -> Option<u16> {
		let matches = |e: &Entity| e.entity_type == entity_type && e.instance_number == instance;
		self.associations_in(range).find_map(|(_, assoc)| {
			assoc
				.children
				.iter()
				.find(|c| matches(c))
				.or_else(|| matches(&assoc.container).then_some(&assoc.container))
				.map(|e| e.container_id)
		})
	}

	/// Sets the entity container id of the local state effecter `effecter_id`.
	///
	/// Returns the record handle when the record changed.
	pub fn set_effecter_container_id(
		&mut self,
		effecter_id: u16,
		container_id: u16,
	) -> Result<Option<RecordHandle>, RepoError> {
		let local = self.local;
		let Some(record) = self.records.range_mut(local.as_range()).map(|(_, r)| r).find(|r| {
			r.pdr_type == PdrType::StateEffecter
				&& StateEffecterPdr::decode(&r.bytes).is_ok_and(|(_, e)| e.effecter_id == effecter_id)
		}) else {
			return Ok(None);
		};
		let before = record.bytes.clone();
		StateEffecterPdr::set_container_id(&mut record.bytes, container_id)?;
		Ok((record.bytes != before).then_some(record.handle))
	}

	/// Rewrites the validity of every terminus locator for `terminus_handle`.
	///
	/// Returns the handles of records that changed.
	pub fn update_terminus_locator(&mut self, terminus_handle: u16, valid: bool) -> Result<Vec<RecordHandle>, RepoError> {
		let mut changed = Vec::new();
		for record in self.records.values_mut().filter(|r| r.pdr_type == PdrType::TerminusLocator) {
			let Ok((_, locator)) = TerminusLocatorPdr::decode(&record.bytes) else {
				continue;
			};
			if locator.terminus_handle != terminus_handle || locator.valid == valid {
				continue;
			}
			TerminusLocatorPdr::set_validity(&mut record.bytes, valid)?;
			changed.push(record.handle);
		}
		Ok(changed)
	}
}
