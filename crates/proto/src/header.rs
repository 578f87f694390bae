//! Three-byte PLDM message header.

use bytes::BufMut;

use crate::codec::Reader;
use crate::{DecodeError, InstanceId};

/// PLDM message type carried in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PldmType {
	/// Messaging control and discovery.
	Base,
	/// Platform monitoring and control (DSP0248).
	Platform,
	/// BIOS control and configuration.
	Bios,
	/// FRU data.
	Fru,
	/// Firmware update.
	FirmwareUpdate,
	/// OEM extensions.
	Oem,
	/// Any type this crate does not name.
	Other(u8),
}

impl From<u8> for PldmType {
	fn from(raw: u8) -> Self {
		match raw {
			0x00 => Self::Base,
			0x02 => Self::Platform,
			0x03 => Self::Bios,
			0x04 => Self::Fru,
			0x05 => Self::FirmwareUpdate,
			0x3F => Self::Oem,
			other => Self::Other(other),
		}
	}
}

impl From<PldmType> for u8 {
	fn from(ty: PldmType) -> Self {
		match ty {
			PldmType::Base => 0x00,
			PldmType::Platform => 0x02,
			PldmType::Bios => 0x03,
			PldmType::Fru => 0x04,
			PldmType::FirmwareUpdate => 0x05,
			PldmType::Oem => 0x3F,
			PldmType::Other(raw) => raw,
		}
	}
}

/// Decoded PLDM message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
	/// Request bit. Clear on responses.
	pub request: bool,
	/// Datagram bit. Set on unacknowledged requests.
	pub datagram: bool,
	/// Instance id correlating request and response.
	pub instance_id: InstanceId,
	/// Message type.
	pub pldm_type: PldmType,
	/// Command code within the type.
	pub command: u8,
}

impl MessageHeader {
	/// Encoded size in bytes.
	pub const LEN: usize = 3;

	/// Header of a request expecting a response.
	pub fn request(instance_id: InstanceId, pldm_type: PldmType, command: u8) -> Self {
		Self { request: true, datagram: false, instance_id, pldm_type, command }
	}

	/// Header of the response to `self`.
	pub fn response(&self) -> Self {
		Self { request: false, datagram: false, ..*self }
	}

	/// Appends the header to `out`.
	pub fn encode(&self, out: &mut impl BufMut) {
		let mut first = self.instance_id.0 & 0x1F;
		if self.request {
			first |= 0x80;
		}
		if self.datagram {
			first |= 0x40;
		}
		out.put_u8(first);
		// header version 0 in the top two bits
		out.put_u8(u8::from(self.pldm_type) & 0x3F);
		out.put_u8(self.command);
	}

	/// Decodes a header from the front of `buf`, returning the payload after it.
	pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
		let mut r = Reader::new(buf);
		let first = r.u8("header.instance")?;
		let second = r.u8("header.type")?;
		let command = r.u8("header.command")?;
		let version = second >> 6;
		if version != 0 {
			return Err(DecodeError::InvalidField { field: "header.version", value: version as u32 });
		}
		let header = Self {
			request: first & 0x80 != 0,
			datagram: first & 0x40 != 0,
			instance_id: InstanceId(first & 0x1F),
			pldm_type: PldmType::from(second & 0x3F),
			command,
		};
		Ok((header, r.rest()))
	}
}
