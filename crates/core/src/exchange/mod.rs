//! Host PDR exchange: fetch, classify, merge and announce host descriptor records.
//!
//! # Purpose
//!
//! - Import the host's PDR repository into the BMC repository one record per GetPDR round trip.
//! - Merge host entity association records into the BMC topology tree and the BMC's own association records.
//! - Rebuild and publish the state sensor index after every completed cycle.
//! - Tell the host which BMC records a cycle added, modified or deleted.
//! - Exclude I/O: this module never sends anything. [`crate::driver`] owns the requester and the message loop.
//!
//! # Mental model
//!
//! - [`HostPdrExchange`] is a synchronous state machine. A cycle is started by [`HostPdrExchange::begin_resync`]
//!   (whole repository) or [`HostPdrExchange::begin_fetch`] (listed handles).
//! - The driver calls [`HostPdrExchange::next_request`] once per scheduled step and performs the returned GetPDR.
//!   The response goes back through [`HostPdrExchange::on_response`], which says whether another step is needed.
//! - At most one request of a cycle is in flight. Steps are separate units of work, never run inside a response
//!   continuation.
//! - Every cycle carries a [`CycleId`]. Responses tagged with anything but the running cycle are discarded.
//! - Records the host owns land in the host handle range. Association records are not stored; their children are
//!   folded into BMC association records in the local range.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`HostPdrExchange`] | Engine owning repository, tree and cycle state | MUST be mutated from one task only | `HostPdrExchange::*` |
//! | [`ExchangeState`] | Observable phase | MUST return to `Idle` or `Aborted` when no cycle runs | `HostPdrExchange::begin_*`, `HostPdrExchange::on_response` |
//! | [`CycleId`] | Monotonic cycle tag | MUST change on every cycle start | `HostPdrExchange::start_cycle` |
//! | [`FetchRequest`] | One GetPDR to perform | MUST be answered with the same cycle id | `HostPdrExchange::next_request` |
//! | [`ChangeNotification`] | Handles added, modified or deleted by a cycle | MUST be empty when nothing differs from the pre-cycle snapshot | `notify::change_set` |
//! | [`ImportedRecord`] | Where a host handle ended up | MUST name live repository content | `HostPdrExchange::process_record`, `merge` |
//! | [`HostLink`] | Shared host reachability flag | Polled at every step | daemon, tests |
//!
//! # Invariants
//!
//! 1. Host-imported records MUST carry handles from the host range only.
//!    - Enforced in: `PdrRepo::insert`
//!    - Tested by: `exchange::tests::resync::host_handles_stay_out_of_local_range`
//!    - Failure symptom: host records shadow or collide with BMC-generated records.
//!
//! 2. Every non-root topology node MUST have exactly one parent after any merge sequence.
//!    - Enforced in: `EntityTree::attach_child`, `merge`
//!    - Tested by: `tree::tests::every_non_root_node_has_exactly_one_parent`, `exchange::tests::merge::conflicting_child_is_skipped`
//!    - Failure symptom: inventory objects appear twice or under two parents.
//!
//! 3. The published sensor index MUST be the result of the last completed cycle.
//!    - Enforced in: `HostPdrExchange::finish`, `SensorIndex::publish`
//!    - Tested by: `exchange::tests::resync::index_is_published_on_completion_only`
//!    - Failure symptom: sensor events are dispatched against a half-populated index.
//!
//! 4. At most one GetPDR of a cycle MUST be in flight.
//!    - Enforced in: `HostPdrExchange::next_request`
//!    - Tested by: `exchange::tests::resync::second_step_while_in_flight_is_a_no_op`
//!    - Failure symptom: responses are processed out of order and the chain skips records.
//!
//! 5. Host-down observed at a step MUST discard the remaining queue without issuing it.
//!    - Enforced in: `HostPdrExchange::next_request`
//!    - Tested by: `exchange::tests::abort::host_down_stops_remaining_steps`
//!    - Failure symptom: requests pile up against an unreachable host until every one times out.
//!
//! 6. Responses for a superseded or aborted cycle MUST NOT touch the repository.
//!    - Enforced in: `HostPdrExchange::on_response`
//!    - Tested by: `exchange::tests::abort::late_response_after_resync_is_discarded`
//!    - Failure symptom: a stale record from an old cycle reappears after a resync.
//!
//! 7. A resync against unchanged host data MUST produce an empty change set.
//!    - Enforced in: `notify::change_set`, `PdrRepo::insert`, `EntityTree::attach_child`
//!    - Tested by: `exchange::tests::resync::identical_resync_reports_nothing`
//!    - Failure symptom: the host refetches the BMC repository after every host reboot.
//!
//! 8. Undoing a merge MUST only remove what the merge added. BMC-owned nodes and the records the BMC built
//!    itself survive.
//!    - Enforced in: `merge`, `unmerge`
//!    - Tested by: `exchange::tests::delete::deleting_merge_keeps_bmc_owned_records`,
//!      `exchange::tests::resync::dropped_host_entity_leaves_topology_on_resync`
//!    - Failure symptom: a host reboot deletes BMC inventory, or entities the host dropped live on forever.
//!
//! # Data flow
//!
//! 1. `begin_resync`: snapshot repository bytes, retract the merged imports, delete the host range, reset termini,
//!    queue handle 0.
//! 2. `next_request`: poll [`HostLink`], pop the next handle, mark it in flight.
//! 3. `on_response`: decode GetPDR, classify the record:
//!    - entity association: merge, never stored;
//!    - state sensor: stored, index marked for rebuild;
//!    - terminus locator: stored, terminus map updated;
//!    - anything else: stored unchanged.
//! 4. Chain mode queues `next_record_handle` until the terminator.
//! 5. `finish`: apply container fix-ups, publish the index, diff touched handles against the snapshot.
//!
//! # Failure modes and recovery
//!
//! - Response decode failure, non-success completion code, transport error, chain loop: the cycle aborts without
//!   rolling back records already imported. The next trigger starts from scratch.
//! - Malformed individual record: skipped with a warning, the cycle continues.
//! - Unknown association parent: children skipped with a warning.
//! - Handle space exhausted: [`ExchangeError::Fatal`]. The driver stops.
//!
//! # Recipes
//!
//! - Add handling for a new record type: add an arm in `HostPdrExchange::process_record` and keep the
//!   `PdrType::Other` pass-through for everything else.
//! - Add an OEM container fix-up: extend [`ExchangeConfig::container_fixups`], no code change needed.

mod merge;
mod notify;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pdrx_proto::{
	CompletionCode, DecodeError, Eid, Entity, EntityAssociationPdr, GetPdrRequest, GetPdrResponse, HandleRange,
	PdrBody, PdrHeader, PdrType, RecordHandle, StateSensorPdr, TERMINATOR, TerminusId, TerminusLocatorPdr,
};
use pdrx_rpc::RequestError;
use rustc_hash::FxHashSet;
use tracing::{debug, error, info, warn};

pub use self::notify::ChangeNotification;
use crate::inventory::{EntityNames, InventorySink, NoopInventory};
use crate::repo::{Origin, PdrRepo, RepoError};
use crate::sensors::{SensorIndex, SensorMap};
use crate::terminus::{TerminusInfo, TerminusMap, Validity};
use crate::tree::EntityTree;

/// OEM fix-up: copy the container id the host reports for an entity into a
/// local state effecter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerFixup {
	/// Local state effecter to patch.
	pub effecter_id: u16,
	/// Entity type to look up in the host's association records.
	pub entity_type: u16,
	/// Entity instance to look up.
	pub entity_instance: u16,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
	/// Host terminus id.
	pub host_tid: TerminusId,
	/// Host MCTP endpoint.
	pub host_eid: Eid,
	/// BMC terminus id, written into outgoing events.
	pub bmc_tid: TerminusId,
	/// Handles for BMC-generated records.
	pub local_range: HandleRange,
	/// Handles for host-imported records.
	pub host_range: HandleRange,
	/// Object path prefix of merged inventory nodes.
	pub inventory_root: String,
	/// Container fix-ups applied after every completed cycle.
	pub container_fixups: Vec<ContainerFixup>,
}

impl Default for ExchangeConfig {
	fn default() -> Self {
		Self {
			host_tid: TerminusId(1),
			host_eid: Eid(9),
			bmc_tid: TerminusId(1),
			local_range: HandleRange::LOCAL,
			host_range: HandleRange::HOST,
			inventory_root: "/xyz/openbmc_project/inventory".to_string(),
			container_fixups: Vec::new(),
		}
	}
}

/// Shared host reachability flag.
#[derive(Debug, Clone)]
pub struct HostLink {
	up: Arc<AtomicBool>,
}

impl Default for HostLink {
	fn default() -> Self {
		Self::new(true)
	}
}

impl HostLink {
	/// Creates a flag with the given initial state.
	pub fn new(up: bool) -> Self {
		Self { up: Arc::new(AtomicBool::new(up)) }
	}

	/// Returns true while the host is reachable.
	pub fn is_up(&self) -> bool {
		self.up.load(Ordering::Acquire)
	}

	/// Updates reachability.
	pub fn set_up(&self, up: bool) {
		self.up.store(up, Ordering::Release);
	}
}

/// Tag distinguishing exchange cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleId(pub u64);

/// Observable phase of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
	/// No cycle is running.
	Idle,
	/// A resync waits for its first record.
	AwaitingFirstRecord,
	/// A GetPDR for the handle is pending or queued.
	FetchingRecord(RecordHandle),
	/// Post-fetch fix-ups and index rebuild.
	Merging,
	/// Computing the change notification.
	NotifyingHost,
	/// The last cycle failed. Behaves like `Idle` for the next trigger.
	///
	/// A cycle stopped by host-down returns to `Idle` instead.
	Aborted(ExchangeError),
}

/// Exchange failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
	/// The host went down mid-cycle.
	#[error("host down")]
	HostDown,
	/// The GetPDR request failed.
	#[error("GetPDR for {handle:#x} failed: {source}")]
	Transport {
		/// Requested handle.
		handle: RecordHandle,
		/// Underlying failure.
		source: RequestError,
	},
	/// The GetPDR response could not be decoded.
	#[error("GetPDR for {handle:#x}: {source}")]
	Decode {
		/// Requested handle.
		handle: RecordHandle,
		/// Decode failure.
		source: DecodeError,
	},
	/// The host answered with a non-success completion code.
	#[error("GetPDR for {handle:#x} completed with {code}")]
	Completion {
		/// Requested handle.
		handle: RecordHandle,
		/// Completion code.
		code: CompletionCode,
	},
	/// The host's record chain revisits a handle.
	#[error("record chain loops back to {0:#x}")]
	ChainLoop(RecordHandle),
	/// Unrecoverable repository failure.
	#[error("repository failure: {0}")]
	Fatal(#[from] RepoError),
}

impl ExchangeError {
	/// Returns true for errors that must stop the driver.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Fatal(_))
	}
}

/// A GetPDR the driver must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
	/// Cycle to report the response under.
	pub cycle: CycleId,
	/// Handle requested.
	pub record_handle: RecordHandle,
	/// Request body.
	pub request: GetPdrRequest,
}

/// What the driver does after a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
	/// Schedule another step.
	Continue,
	/// The cycle finished. Send the notification when present.
	Complete(Option<ChangeNotification>),
	/// The response belonged to no running cycle and was dropped.
	Stale,
}

/// Where a host record handle ended up in the BMC repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportedRecord {
	/// Stored as its own record.
	Stored(RecordHandle),
	/// Folded into a BMC association record.
	Merged {
		/// BMC entity the children were attached under.
		parent: Entity,
		/// Children this record contributed.
		children: Vec<Entity>,
		/// BMC association record holding them.
		bmc_handle: RecordHandle,
	},
}

/// Cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStats {
	/// Cycles that ran to completion.
	pub cycles_completed: u64,
	/// Cycles that aborted.
	pub cycles_aborted: u64,
	/// Host records stored.
	pub records_stored: u64,
	/// Host association records merged.
	pub associations_merged: u64,
	/// Host records skipped as malformed or unplaceable.
	pub records_skipped: u64,
	/// Responses dropped for belonging to no running cycle.
	pub stale_responses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
	/// Follow `next_record_handle` until the terminator.
	Chain,
	/// Fetch exactly the queued handles.
	Handles,
}

#[derive(Debug)]
struct PendingFetch {
	cycle: CycleId,
	mode: FetchMode,
	remaining_handles: VecDeque<RecordHandle>,
	in_flight: Option<RecordHandle>,
	seen: FxHashSet<RecordHandle>,
	merged_first_parent: bool,
	accumulated_changed_handles: BTreeSet<RecordHandle>,
	snapshot: BTreeMap<RecordHandle, Vec<u8>>,
}

/// The host PDR exchange engine.
pub struct HostPdrExchange {
	config: ExchangeConfig,
	repo: PdrRepo,
	tree: EntityTree,
	termini: TerminusMap,
	imports: BTreeMap<RecordHandle, ImportedRecord>,
	sensors: Arc<SensorIndex>,
	inventory: Arc<dyn InventorySink>,
	names: EntityNames,
	host: HostLink,
	state: ExchangeState,
	pending: Option<PendingFetch>,
	next_cycle: u64,
	stats: ExchangeStats,
}

impl std::fmt::Debug for HostPdrExchange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HostPdrExchange")
			.field("state", &self.state)
			.field("records", &self.repo.len())
			.field("nodes", &self.tree.len())
			.field("stats", &self.stats)
			.finish_non_exhaustive()
	}
}

impl HostPdrExchange {
	/// Creates an engine over a repository and tree already holding the BMC's
	/// own records and topology.
	pub fn new(config: ExchangeConfig, repo: PdrRepo, tree: EntityTree, host: HostLink) -> Self {
		Self {
			config,
			repo,
			tree,
			termini: TerminusMap::new(),
			imports: BTreeMap::new(),
			sensors: Arc::new(SensorIndex::new()),
			inventory: Arc::new(NoopInventory),
			names: EntityNames::default(),
			host,
			state: ExchangeState::Idle,
			pending: None,
			next_cycle: 0,
			stats: ExchangeStats::default(),
		}
	}

	/// Sets the inventory collaborator.
	pub fn with_inventory(mut self, inventory: Arc<dyn InventorySink>) -> Self {
		self.inventory = inventory;
		self
	}

	/// Sets the entity names used for object paths.
	pub fn with_names(mut self, names: EntityNames) -> Self {
		self.names = names;
		self
	}

	/// Publishes sensor maps into `sensors` instead of a private index.
	pub fn with_sensor_index(mut self, sensors: Arc<SensorIndex>) -> Self {
		self.sensors = sensors;
		self
	}

	/// Engine configuration.
	pub fn config(&self) -> &ExchangeConfig {
		&self.config
	}

	/// The BMC repository.
	pub fn repo(&self) -> &PdrRepo {
		&self.repo
	}

	/// The BMC topology tree.
	pub fn tree(&self) -> &EntityTree {
		&self.tree
	}

	/// Known host termini by terminus handle.
	pub fn termini(&self) -> &TerminusMap {
		&self.termini
	}

	/// Where each imported host handle lives.
	pub fn imports(&self) -> &BTreeMap<RecordHandle, ImportedRecord> {
		&self.imports
	}

	/// Index the engine publishes into.
	pub fn sensor_index(&self) -> &Arc<SensorIndex> {
		&self.sensors
	}

	/// Host reachability flag.
	pub fn host_link(&self) -> &HostLink {
		&self.host
	}

	/// Current phase.
	pub fn state(&self) -> &ExchangeState {
		&self.state
	}

	/// Counters.
	pub fn stats(&self) -> ExchangeStats {
		self.stats
	}

	/// Returns true while a cycle is running.
	pub fn is_busy(&self) -> bool {
		self.pending.is_some()
	}

	/// Handles still queued in the running cycle.
	pub fn remaining_handles(&self) -> usize {
		self.pending.as_ref().map_or(0, |p| p.remaining_handles.len())
	}

	fn start_cycle(&mut self, mode: FetchMode, handles: VecDeque<RecordHandle>) -> CycleId {
		if let Some(old) = self.pending.take() {
			info!(cycle = old.cycle.0, "superseding running exchange cycle");
			self.stats.cycles_aborted += 1;
		}
		let cycle = CycleId(self.next_cycle);
		self.next_cycle += 1;
		self.pending = Some(PendingFetch {
			cycle,
			mode,
			remaining_handles: handles,
			in_flight: None,
			seen: FxHashSet::default(),
			merged_first_parent: false,
			accumulated_changed_handles: BTreeSet::new(),
			snapshot: self.repo.content_snapshot(),
		});
		cycle
	}

	/// Starts a full resync of the host repository.
	///
	/// Retracts everything the previous imports put into the BMC: host-created
	/// topology nodes are detached and stripped from the local association
	/// records, listings merged into BMC records are taken back, and every
	/// host-range record and the terminus map are dropped. The BMC's own
	/// records and nodes stay. Queues the host's first record.
	///
	/// The pre-cycle snapshot is taken first, so a host that re-sends the
	/// same records yields an empty change set and a host that dropped an
	/// entity yields the records it leaves behind.
	pub fn begin_resync(&mut self) -> CycleId {
		let cycle = self.start_cycle(FetchMode::Chain, VecDeque::from([TERMINATOR]));
		let retracted = self.retract_merges();
		let removed = self.repo.delete_range(self.config.host_range);
		self.termini.clear();
		if let Some(pending) = self.pending.as_mut() {
			pending.accumulated_changed_handles.extend(retracted.iter().copied());
			pending.accumulated_changed_handles.extend(removed.iter().map(|r| r.handle()));
		}
		self.state = ExchangeState::AwaitingFirstRecord;
		info!(cycle = cycle.0, retracted = retracted.len(), removed = removed.len(), "host PDR resync started");
		cycle
	}

	/// Undoes every merged association import and forgets all imports.
	fn retract_merges(&mut self) -> BTreeSet<RecordHandle> {
		let mut touched = BTreeSet::new();
		for (host_handle, import) in std::mem::take(&mut self.imports) {
			let ImportedRecord::Merged { children, bmc_handle, .. } = import else {
				continue;
			};
			for child in children {
				match self.unmerge(bmc_handle, child) {
					Ok(handles) => touched.extend(handles),
					Err(e) => warn!(host_handle, ?child, error = %e, "failed to retract merged entity"),
				}
			}
		}
		touched
	}

	/// Fetches exactly `handles` from the host, without following the chain
	/// and without clearing the host range.
	///
	/// Joins the running cycle when there is one. Returns `None` when there is
	/// nothing to fetch.
	pub fn begin_fetch(&mut self, handles: impl IntoIterator<Item = RecordHandle>) -> Option<CycleId> {
		let mut handles: VecDeque<RecordHandle> = handles.into_iter().filter(|h| *h != TERMINATOR).collect();
		if let Some(pending) = self.pending.as_mut() {
			handles.retain(|h| !pending.remaining_handles.contains(h) && pending.in_flight != Some(*h));
			debug!(cycle = pending.cycle.0, added = handles.len(), "joining running exchange cycle");
			pending.remaining_handles.extend(handles);
			return Some(pending.cycle);
		}
		if handles.is_empty() {
			return None;
		}
		let first = handles[0];
		let count = handles.len();
		let cycle = self.start_cycle(FetchMode::Handles, handles);
		self.state = ExchangeState::FetchingRecord(first);
		info!(cycle = cycle.0, count, "host PDR incremental fetch started");
		Some(cycle)
	}

	fn abort(&mut self, err: ExchangeError) -> ExchangeError {
		if let Some(pending) = self.pending.take() {
			let dropped = pending.remaining_handles.len();
			if err.is_fatal() {
				error!(cycle = pending.cycle.0, dropped, error = %err, "exchange cycle failed");
			} else {
				warn!(cycle = pending.cycle.0, dropped, error = %err, "exchange cycle aborted");
			}
		}
		self.stats.cycles_aborted += 1;
		self.state = match err {
			ExchangeError::HostDown => ExchangeState::Idle,
			_ => ExchangeState::Aborted(err.clone()),
		};
		err
	}

	/// Produces the next GetPDR of the running cycle.
	///
	/// Returns `Ok(None)` when no cycle runs or a request is already in flight.
	/// Aborts the cycle with [`ExchangeError::HostDown`] when the host is down.
	pub fn next_request(&mut self) -> Result<Option<FetchRequest>, ExchangeError> {
		let Some(pending) = self.pending.as_mut() else {
			return Ok(None);
		};
		if !self.host.is_up() {
			return Err(self.abort(ExchangeError::HostDown));
		}
		if pending.in_flight.is_some() {
			return Ok(None);
		}
		let Some(handle) = pending.remaining_handles.pop_front() else {
			return Ok(None);
		};
		pending.in_flight = Some(handle);
		pending.seen.insert(handle);
		if handle != TERMINATOR {
			self.state = ExchangeState::FetchingRecord(handle);
		}
		debug!(cycle = pending.cycle.0, handle, "requesting host PDR");
		Ok(Some(FetchRequest { cycle: pending.cycle, record_handle: handle, request: GetPdrRequest::first_part(handle) }))
	}

	/// Processes the GetPDR response body of `cycle`.
	///
	/// `Err` means the cycle aborted; records already imported stay.
	pub fn on_response(
		&mut self,
		cycle: CycleId,
		response: Result<Vec<u8>, RequestError>,
	) -> Result<ResponseOutcome, ExchangeError> {
		let Some(pending) = self.pending.as_mut().filter(|p| p.cycle == cycle) else {
			debug!(cycle = cycle.0, "dropping response for inactive cycle");
			self.stats.stale_responses += 1;
			return Ok(ResponseOutcome::Stale);
		};
		let Some(handle) = pending.in_flight.take() else {
			debug!(cycle = cycle.0, "dropping unexpected response");
			self.stats.stale_responses += 1;
			return Ok(ResponseOutcome::Stale);
		};

		let body = match response {
			Ok(body) => body,
			Err(source) => return Err(self.abort(ExchangeError::Transport { handle, source })),
		};
		let decoded = match GetPdrResponse::decode(&body) {
			Ok(decoded) => decoded,
			Err(source) => return Err(self.abort(ExchangeError::Decode { handle, source })),
		};
		if !decoded.completion_code.is_success() {
			return Err(self.abort(ExchangeError::Completion { handle, code: decoded.completion_code }));
		}
		let next = decoded.next_record_handle;
		let record = match decoded.into_single_record() {
			Ok(record) => record,
			Err(source) => return Err(self.abort(ExchangeError::Decode { handle, source })),
		};

		if let Err(e) = self.process_record(record) {
			return Err(self.abort(e.into()));
		}

		let Some(pending) = self.pending.as_mut() else {
			return Ok(ResponseOutcome::Stale);
		};
		if pending.mode == FetchMode::Chain && next != TERMINATOR {
			if !pending.seen.insert(next) {
				return Err(self.abort(ExchangeError::ChainLoop(next)));
			}
			pending.remaining_handles.push_back(next);
		}
		if pending.remaining_handles.is_empty() {
			return self.finish().map(ResponseOutcome::Complete);
		}
		Ok(ResponseOutcome::Continue)
	}

	/// Classifies one host record and imports it.
	fn process_record(&mut self, record: Vec<u8>) -> Result<(), RepoError> {
		let header = match PdrHeader::split(&record) {
			Ok((header, _)) => header,
			Err(e) => {
				warn!(error = %e, "skipping malformed host record");
				self.stats.records_skipped += 1;
				return Ok(());
			}
		};
		let host_handle = header.record_handle;
		if let Some(pending) = self.pending.as_mut() {
			pending.seen.insert(host_handle);
		}
		if self.imports.contains_key(&host_handle) {
			debug!(host_handle, "host record fetched again, replacing previous import");
			let touched = self.delete_pdr_from_repo([host_handle])?;
			if let Some(pending) = self.pending.as_mut() {
				pending.accumulated_changed_handles.extend(touched);
			}
		}

		match header.pdr_type {
			PdrType::EntityAssociation => match EntityAssociationPdr::decode(&record) {
				Ok((_, assoc)) => return self.merge(host_handle, assoc),
				Err(e) => return self.skip(host_handle, e),
			},
			PdrType::StateSensor => {
				if let Err(e) = StateSensorPdr::decode(&record) {
					return self.skip(host_handle, e);
				}
			}
			PdrType::TerminusLocator => match TerminusLocatorPdr::decode(&record) {
				Ok((_, locator)) => {
					self.termini.insert(locator.terminus_handle, TerminusInfo::from(&locator));
				}
				Err(e) => return self.skip(host_handle, e),
			},
			_ => {}
		}

		let handle = self.repo.insert(Origin::Host, record)?;
		self.imports.insert(host_handle, ImportedRecord::Stored(handle));
		self.stats.records_stored += 1;
		if let Some(pending) = self.pending.as_mut() {
			pending.accumulated_changed_handles.insert(handle);
		}
		debug!(host_handle, handle, pdr_type = ?header.pdr_type, "stored host record");
		Ok(())
	}

	fn skip(&mut self, host_handle: RecordHandle, e: DecodeError) -> Result<(), RepoError> {
		warn!(host_handle, error = %e, "skipping malformed host record");
		self.stats.records_skipped += 1;
		Ok(())
	}

	/// Completes the running cycle: fix-ups, index, change set.
	fn finish(&mut self) -> Result<Option<ChangeNotification>, ExchangeError> {
		self.state = ExchangeState::Merging;
		let fixed = match self.apply_container_fixups() {
			Ok(fixed) => fixed,
			Err(e) => return Err(self.abort(e.into())),
		};
		self.publish_sensor_index();

		self.state = ExchangeState::NotifyingHost;
		let Some(mut pending) = self.pending.take() else {
			return Ok(None);
		};
		pending.accumulated_changed_handles.extend(fixed);
		let notification = notify::change_set(&self.repo, &pending.snapshot, &pending.accumulated_changed_handles);

		self.stats.cycles_completed += 1;
		self.state = ExchangeState::Idle;
		info!(
			cycle = pending.cycle.0,
			added = notification.added.len(),
			modified = notification.modified.len(),
			deleted = notification.deleted.len(),
			"exchange cycle complete"
		);
		Ok((!notification.is_empty()).then_some(notification))
	}

	fn apply_container_fixups(&mut self) -> Result<Vec<RecordHandle>, RepoError> {
		let mut changed = Vec::new();
		for fixup in &self.config.container_fixups {
			let lookup = |range| self.repo.find_container_id(fixup.entity_type, fixup.entity_instance, range);
			// merged host children live in the local association records
			let Some(container_id) = lookup(self.config.host_range).or_else(|| lookup(self.config.local_range)) else {
				debug!(?fixup, "no host container id for fix-up");
				continue;
			};
			if let Some(handle) = self.repo.set_effecter_container_id(fixup.effecter_id, container_id)? {
				debug!(effecter_id = fixup.effecter_id, container_id, handle, "effecter container id updated");
				changed.push(handle);
			}
		}
		Ok(changed)
	}

	fn publish_sensor_index(&self) {
		let host_range = self.config.host_range;
		let records = self.repo.iter_by_type(PdrType::StateSensor).filter(|r| host_range.contains(r.handle()));
		let map = SensorMap::rebuild(records.map(|r| r.bytes()), &self.termini, self.config.host_tid);
		debug!(sensors = map.len(), "publishing sensor index");
		self.sensors.publish(map);
	}

	/// Removes the records imported for `host_handles`.
	///
	/// Stored records are deleted. Children a merged association record
	/// created are detached from the tree together with their subtrees and
	/// stripped from the BMC association records. Children that were already
	/// BMC nodes are only taken back out of the record the merge appended
	/// them to. The sensor index is rebuilt when
	/// a state sensor went away. Returns the BMC handles that changed or
	/// disappeared.
	pub fn delete_pdr_from_repo(
		&mut self,
		host_handles: impl IntoIterator<Item = RecordHandle>,
	) -> Result<BTreeSet<RecordHandle>, RepoError> {
		let mut touched = BTreeSet::new();
		let mut sensors_removed = false;
		for host_handle in host_handles {
			match self.imports.remove(&host_handle) {
				Some(ImportedRecord::Stored(handle)) => {
					for record in self.repo.delete_by_handles(&BTreeSet::from([handle])) {
						match record.pdr_type() {
							PdrType::StateSensor => sensors_removed = true,
							PdrType::TerminusLocator => {
								if let Ok((_, locator)) = TerminusLocatorPdr::decode(record.bytes()) {
									self.termini.remove(&locator.terminus_handle);
								}
							}
							_ => {}
						}
						touched.insert(record.handle());
					}
				}
				Some(ImportedRecord::Merged { children, bmc_handle, .. }) => {
					for child in children {
						touched.extend(self.unmerge(bmc_handle, child)?);
					}
				}
				None => debug!(host_handle, "delete for unknown host handle"),
			}
		}
		if sensors_removed {
			self.publish_sensor_index();
		}
		Ok(touched)
	}

	/// Marks every host terminus unreachable and rewrites the validity of the
	/// stored terminus locators.
	pub fn on_host_down(&mut self) -> Result<Vec<RecordHandle>, RepoError> {
		let mut changed = Vec::new();
		for (terminus_handle, info) in self.termini.iter_mut() {
			info.validity = Validity::Invalid;
			changed.extend(self.repo.update_terminus_locator(*terminus_handle, false)?);
		}
		info!(termini = self.termini.len(), "host termini marked invalid");
		Ok(changed)
	}

	/// Answers a GetPDR from the host out of the BMC repository.
	pub fn serve_get_pdr(&self, request: &GetPdrRequest) -> GetPdrResponse {
		match self.repo.get_with_next(request.record_handle) {
			Some((record, next)) => GetPdrResponse::single(next, record.bytes().to_vec()),
			None => GetPdrResponse {
				completion_code: CompletionCode::INVALID_RECORD_HANDLE,
				..GetPdrResponse::single(TERMINATOR, Vec::new())
			},
		}
	}
}

#[cfg(test)]
mod tests;
