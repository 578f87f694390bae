//! Terminus bookkeeping fed by terminus locator records.

use std::collections::BTreeMap;

use pdrx_proto::{Eid, TerminusId, TerminusLocatorPdr};

/// Whether a terminus is currently reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
	/// The terminus answers requests.
	Valid,
	/// The terminus is down or unknown.
	Invalid,
}

impl From<bool> for Validity {
	fn from(valid: bool) -> Self {
		if valid { Self::Valid } else { Self::Invalid }
	}
}

/// What the BMC knows about one host terminus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminusInfo {
	/// Terminus id.
	pub tid: TerminusId,
	/// MCTP endpoint id, when the locator is MCTP.
	pub eid: Option<Eid>,
	/// Reachability.
	pub validity: Validity,
}

impl From<&TerminusLocatorPdr> for TerminusInfo {
	fn from(locator: &TerminusLocatorPdr) -> Self {
		Self { tid: locator.tid, eid: locator.eid(), validity: locator.valid.into() }
	}
}

/// Terminus info keyed by terminus handle.
pub type TerminusMap = BTreeMap<u16, TerminusInfo>;
