//! Instance id allocation.
//!
//! Each terminus owns a pool of [`InstanceId::COUNT`] ids. An id is handed
//! out by [`InstanceIdDb::allocate`] and stays in use until
//! [`InstanceIdDb::release`]; at most one outstanding allocation exists per
//! `(terminus, id)` pair. Allocation scans round-robin from the slot after the
//! previous allocation so a just-released id is the last to be reused.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use pdrx_proto::{InstanceId, TerminusId};
use rustc_hash::FxHashMap;

/// Allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InstanceIdError {
	/// Every id of the terminus is in use.
	#[error("no free instance id for {0}")]
	Exhausted(TerminusId),
	/// The released id is out of range or not currently allocated.
	#[error("{id} is not allocated for {tid}")]
	InvalidId {
		/// Terminus the id was released for.
		tid: TerminusId,
		/// Offending id.
		id: InstanceId,
	},
}

#[derive(Debug, Default)]
struct Pool {
	in_use: u32,
	next: u8,
}

impl Pool {
	fn allocate(&mut self) -> Option<InstanceId> {
		let (start, in_use) = (self.next, self.in_use);
		let id = (0..InstanceId::COUNT)
			.map(|step| (start + step) % InstanceId::COUNT)
			.find(|id| in_use & (1u32 << id) == 0)?;
		self.in_use |= 1 << id;
		self.next = (id + 1) % InstanceId::COUNT;
		Some(InstanceId(id))
	}

	fn release(&mut self, id: InstanceId) -> bool {
		if !id.is_valid() || self.in_use & (1 << id.0) == 0 {
			return false;
		}
		self.in_use &= !(1 << id.0);
		true
	}
}

/// Instance id pools keyed by terminus.
///
/// Pools are created on first use. Each pool sits behind its own mutex so
/// allocations for different termini never contend.
#[derive(Debug, Default)]
pub struct InstanceIdDb {
	pools: RwLock<FxHashMap<TerminusId, Arc<Mutex<Pool>>>>,
}

impl InstanceIdDb {
	/// Creates an empty database.
	pub fn new() -> Self {
		Self::default()
	}

	fn pool(&self, tid: TerminusId) -> Arc<Mutex<Pool>> {
		if let Some(pool) = self.pools.read().get(&tid) {
			return pool.clone();
		}
		self.pools.write().entry(tid).or_default().clone()
	}

	/// Allocates a free id for `tid`. Never blocks and never retries.
	pub fn allocate(&self, tid: TerminusId) -> Result<InstanceId, InstanceIdError> {
		self.pool(tid).lock().allocate().ok_or(InstanceIdError::Exhausted(tid))
	}

	/// Returns `id` to the pool of `tid`.
	pub fn release(&self, tid: TerminusId, id: InstanceId) -> Result<(), InstanceIdError> {
		if self.pool(tid).lock().release(id) {
			Ok(())
		} else {
			Err(InstanceIdError::InvalidId { tid, id })
		}
	}

	/// Number of ids currently allocated for `tid`.
	pub fn in_use(&self, tid: TerminusId) -> u32 {
		self.pools.read().get(&tid).map_or(0, |pool| pool.lock().in_use.count_ones())
	}
}

#[cfg(test)]
mod tests;
