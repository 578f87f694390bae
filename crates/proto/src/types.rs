//! Identifier newtypes and protocol constants shared across the exchange.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// PDR record handle. Unique within one repository.
pub type RecordHandle = u32;

/// Next-record handle value that ends a GetPDR chain.
pub const TERMINATOR: RecordHandle = 0;

/// PLDM terminus identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminusId(pub u8);

impl fmt::Display for TerminusId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "tid:{}", self.0)
	}
}

/// MCTP endpoint identifier of a terminus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(pub u8);

impl fmt::Display for Eid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "eid:{}", self.0)
	}
}

/// PLDM instance identifier correlating a request with its response.
///
/// Only the low five bits travel in the message header, so valid ids are
/// `0..InstanceId::COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u8);

impl InstanceId {
	/// Number of distinct instance ids per terminus.
	pub const COUNT: u8 = 32;

	/// Returns true when the id fits the five-bit header field.
	pub fn is_valid(self) -> bool {
		self.0 < Self::COUNT
	}
}

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "iid:{}", self.0)
	}
}

/// Inclusive range of record handles owned by one record origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleRange {
	/// First handle of the range.
	pub start: RecordHandle,
	/// Last handle of the range, inclusive.
	pub end: RecordHandle,
}

impl HandleRange {
	/// Handles the BMC assigns to locally generated records.
	pub const LOCAL: Self = Self::new(0x0000_0001, 0x00FF_FFFF);
	/// Handles the BMC assigns to records imported from the host.
	pub const HOST: Self = Self::new(0x0100_0000, 0x01FF_FFFF);

	/// Creates a range covering `start..=end`.
	pub const fn new(start: RecordHandle, end: RecordHandle) -> Self {
		Self { start, end }
	}

	/// Returns true when `handle` lies inside the range.
	pub fn contains(&self, handle: RecordHandle) -> bool {
		(self.start..=self.end).contains(&handle)
	}

	/// Returns true when the two ranges share at least one handle.
	pub fn overlaps(&self, other: &HandleRange) -> bool {
		self.start <= other.end && other.start <= self.end
	}

	/// Returns the range as a std inclusive range.
	pub fn as_range(&self) -> RangeInclusive<RecordHandle> {
		self.start..=self.end
	}
}

impl fmt::Display for HandleRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#010x}..={:#010x}", self.start, self.end)
	}
}

/// PLDM completion code, the first byte of every response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionCode(pub u8);

impl CompletionCode {
	/// Command completed normally.
	pub const SUCCESS: Self = Self(0x00);
	/// Generic failure.
	pub const ERROR: Self = Self(0x01);
	/// Request carried invalid data.
	pub const ERROR_INVALID_DATA: Self = Self(0x02);
	/// Request length was wrong for the command.
	pub const ERROR_INVALID_LENGTH: Self = Self(0x03);
	/// Responder cannot service the request yet.
	pub const ERROR_NOT_READY: Self = Self(0x04);
	/// Command is not supported by the responder.
	pub const ERROR_UNSUPPORTED_PLDM_CMD: Self = Self(0x05);
	/// GetPDR: the requested record handle does not exist.
	pub const INVALID_RECORD_HANDLE: Self = Self(0x82);
	/// Sensor event: sensor id is unknown to the receiver.
	pub const INVALID_SENSOR_ID: Self = Self(0x80);
	/// Sensor event: the reported state is not a possible state.
	pub const INVALID_STATE_VALUE: Self = Self(0x81);

	/// Returns true for [`CompletionCode::SUCCESS`].
	pub fn is_success(self) -> bool {
		self == Self::SUCCESS
	}
}

impl fmt::Display for CompletionCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "cc:{:#04x}", self.0)
	}
}
