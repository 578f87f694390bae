//! Platform Descriptor Record layouts.
//!
//! A record is the 10-byte common header followed by `data_length` bytes of
//! type-specific body. Only the record types the exchange engine inspects get
//! a typed body here; everything else is carried as opaque bytes by the
//! repository.

use std::collections::BTreeSet;

use bytes::BufMut;

use crate::codec::Reader;
use crate::{DecodeError, Eid, RecordHandle, TerminusId};

/// Record type from the PDR common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PdrType {
	/// Terminus locator.
	TerminusLocator,
	/// Numeric sensor.
	NumericSensor,
	/// State sensor.
	StateSensor,
	/// Numeric effecter.
	NumericEffecter,
	/// State effecter.
	StateEffecter,
	/// Entity association.
	EntityAssociation,
	/// FRU record set.
	FruRecordSet,
	/// OEM-defined record.
	Oem,
	/// Any type without a dedicated arm. Passed through untouched.
	Other(u8),
}

impl From<u8> for PdrType {
	fn from(raw: u8) -> Self {
		match raw {
			1 => Self::TerminusLocator,
			2 => Self::NumericSensor,
			4 => Self::StateSensor,
			9 => Self::NumericEffecter,
			11 => Self::StateEffecter,
			15 => Self::EntityAssociation,
			20 => Self::FruRecordSet,
			127 => Self::Oem,
			other => Self::Other(other),
		}
	}
}

impl From<PdrType> for u8 {
	fn from(ty: PdrType) -> Self {
		match ty {
			PdrType::TerminusLocator => 1,
			PdrType::NumericSensor => 2,
			PdrType::StateSensor => 4,
			PdrType::NumericEffecter => 9,
			PdrType::StateEffecter => 11,
			PdrType::EntityAssociation => 15,
			PdrType::FruRecordSet => 20,
			PdrType::Oem => 127,
			PdrType::Other(raw) => raw,
		}
	}
}

/// PDR common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdrHeader {
	/// Record handle.
	pub record_handle: RecordHandle,
	/// Header version, [`PdrHeader::VERSION`] for every record produced here.
	pub version: u8,
	/// Record type.
	pub pdr_type: PdrType,
	/// Change number of the record.
	pub record_change_number: u16,
	/// Length of the body following the header.
	pub data_length: u16,
}

impl PdrHeader {
	/// Encoded size of the common header.
	pub const LEN: usize = 10;
	/// Header version written by [`PdrBody::to_record`].
	pub const VERSION: u8 = 1;

	/// Decodes the common header at the front of `record`.
	pub fn decode(record: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(record);
		Ok(Self {
			record_handle: r.u32("pdr.record_handle")?,
			version: r.u8("pdr.version")?,
			pdr_type: PdrType::from(r.u8("pdr.type")?),
			record_change_number: r.u16("pdr.record_change_number")?,
			data_length: r.u16("pdr.data_length")?,
		})
	}

	/// Decodes the header and returns the body it declares.
	///
	/// Fails when the declared length runs past the end of `record`. Trailing
	/// bytes beyond the declared length are ignored.
	pub fn split(record: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
		let header = Self::decode(record)?;
		let actual = record.len() - Self::LEN;
		let declared = header.data_length as usize;
		if declared > actual {
			return Err(DecodeError::LengthMismatch { handle: header.record_handle, declared, actual });
		}
		Ok((header, &record[Self::LEN..Self::LEN + declared]))
	}

	/// Appends the header to `out`.
	pub fn encode(&self, out: &mut impl BufMut) {
		out.put_u32_le(self.record_handle);
		out.put_u8(self.version);
		out.put_u8(self.pdr_type.into());
		out.put_u16_le(self.record_change_number);
		out.put_u16_le(self.data_length);
	}
}

/// Rewrites the handle field of an encoded record in place.
pub fn set_record_handle(record: &mut [u8], handle: RecordHandle) -> Result<(), DecodeError> {
	patch(record, 0, &handle.to_le_bytes(), "pdr.record_handle")
}

fn patch(record: &mut [u8], offset: usize, value: &[u8], field: &'static str) -> Result<(), DecodeError> {
	let end = offset + value.len();
	if record.len() < end {
		return Err(DecodeError::Truncated { field, needed: end, remaining: record.len() });
	}
	record[offset..end].copy_from_slice(value);
	Ok(())
}

/// A typed record body with a fixed PDR type.
pub trait PdrBody: Sized {
	/// Record type this body belongs to.
	const TYPE: PdrType;

	/// Decodes the body from a reader positioned after the common header.
	fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

	/// Appends the encoded body to `out`.
	fn encode_body(&self, out: &mut Vec<u8>);

	/// Decodes a complete record, checking its type and declared length.
	fn decode(record: &[u8]) -> Result<(PdrHeader, Self), DecodeError> {
		let (header, body) = PdrHeader::split(record)?;
		if header.pdr_type != Self::TYPE {
			return Err(DecodeError::UnexpectedType { expected: Self::TYPE.into(), found: header.pdr_type.into() });
		}
		let body = Self::decode_body(&mut Reader::new(body))?;
		Ok((header, body))
	}

	/// Encodes a complete record with the given handle.
	fn to_record(&self, record_handle: RecordHandle) -> Vec<u8> {
		let mut body = Vec::new();
		self.encode_body(&mut body);
		let header = PdrHeader {
			record_handle,
			version: PdrHeader::VERSION,
			pdr_type: Self::TYPE,
			record_change_number: 0,
			data_length: body.len() as u16,
		};
		let mut out = Vec::with_capacity(PdrHeader::LEN + body.len());
		header.encode(&mut out);
		out.extend_from_slice(&body);
		out
	}
}

/// Entity identification triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
	/// Entity type (DSP0249).
	pub entity_type: u16,
	/// Instance number among entities of the same type.
	pub instance_number: u16,
	/// Id of the container the entity lives in.
	pub container_id: u16,
}

impl Entity {
	/// Encoded size.
	pub const LEN: usize = 6;

	/// Creates an entity triple.
	pub const fn new(entity_type: u16, instance_number: u16, container_id: u16) -> Self {
		Self { entity_type, instance_number, container_id }
	}

	fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
		Ok(Self {
			entity_type: r.u16("entity.type")?,
			instance_number: r.u16("entity.instance_number")?,
			container_id: r.u16("entity.container_id")?,
		})
	}

	fn encode(&self, out: &mut impl BufMut) {
		out.put_u16_le(self.entity_type);
		out.put_u16_le(self.instance_number);
		out.put_u16_le(self.container_id);
	}
}

/// Entity association record: one container entity and the entities it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAssociationPdr {
	/// Container id assigned to the contained entities.
	pub container_id: u16,
	/// [`EntityAssociationPdr::PHYSICAL`] or [`EntityAssociationPdr::LOGICAL`].
	pub association_type: u8,
	/// The containing entity.
	pub container: Entity,
	/// Contained entities in record order.
	pub children: Vec<Entity>,
}

impl EntityAssociationPdr {
	/// Physical containment.
	pub const PHYSICAL: u8 = 0;
	/// Logical grouping.
	pub const LOGICAL: u8 = 1;
}

impl PdrBody for EntityAssociationPdr {
	const TYPE: PdrType = PdrType::EntityAssociation;

	fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
		let container_id = r.u16("association.container_id")?;
		let association_type = r.u8("association.type")?;
		let container = Entity::decode(r)?;
		let count = r.u8("association.num_children")?;
		let children = (0..count).map(|_| Entity::decode(r)).collect::<Result<Vec<_>, _>>()?;
		Ok(Self { container_id, association_type, container, children })
	}

	fn encode_body(&self, out: &mut Vec<u8>) {
		out.put_u16_le(self.container_id);
		out.put_u8(self.association_type);
		self.container.encode(out);
		out.put_u8(self.children.len() as u8);
		for child in &self.children {
			child.encode(out);
		}
	}
}

/// Possible-states block of a state sensor or effecter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PossibleStates {
	/// State set (DSP0249).
	pub state_set_id: u16,
	/// States the sensor or effecter can report, decoded from the bitfield.
	pub states: BTreeSet<u8>,
}

impl PossibleStates {
	fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
		let state_set_id = r.u16("possible_states.state_set_id")?;
		let size = r.u8("possible_states.size")?;
		if size == 0 || size > 32 {
			return Err(DecodeError::InvalidField { field: "possible_states.size", value: size as u32 });
		}
		let bits = r.bytes("possible_states.states", size as usize)?;
		let states = bits
			.iter()
			.enumerate()
			.flat_map(|(byte, bits)| (0..8u8).filter(move |bit| bits & (1 << bit) != 0).map(move |bit| byte as u8 * 8 + bit))
			.collect();
		Ok(Self { state_set_id, states })
	}

	fn encode(&self, out: &mut impl BufMut) {
		let size = self.states.last().map_or(1, |max| max / 8 + 1);
		let mut bits = vec![0u8; size as usize];
		for state in &self.states {
			bits[(state / 8) as usize] |= 1 << (state % 8);
		}
		out.put_u16_le(self.state_set_id);
		out.put_u8(size);
		out.put_slice(&bits);
	}
}

fn decode_composite(r: &mut Reader<'_>, field: &'static str) -> Result<Vec<PossibleStates>, DecodeError> {
	let count = r.u8(field)?;
	(0..count).map(|_| PossibleStates::decode(r)).collect()
}

/// State sensor record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSensorPdr {
	/// Terminus handle of the owning terminus locator.
	pub terminus_handle: u16,
	/// Sensor id, unique within the terminus.
	pub sensor_id: u16,
	/// Entity the sensor monitors.
	pub entity: Entity,
	/// Initialization hint.
	pub sensor_init: u8,
	/// Whether an auxiliary names record exists.
	pub has_aux_names: bool,
	/// One block per composite sensor offset.
	pub possible_states: Vec<PossibleStates>,
}

impl PdrBody for StateSensorPdr {
	const TYPE: PdrType = PdrType::StateSensor;

	fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
		Ok(Self {
			terminus_handle: r.u16("state_sensor.terminus_handle")?,
			sensor_id: r.u16("state_sensor.sensor_id")?,
			entity: Entity::decode(r)?,
			sensor_init: r.u8("state_sensor.sensor_init")?,
			has_aux_names: r.u8("state_sensor.aux_names")? != 0,
			possible_states: decode_composite(r, "state_sensor.composite_count")?,
		})
	}

	fn encode_body(&self, out: &mut Vec<u8>) {
		out.put_u16_le(self.terminus_handle);
		out.put_u16_le(self.sensor_id);
		self.entity.encode(out);
		out.put_u8(self.sensor_init);
		out.put_u8(self.has_aux_names as u8);
		out.put_u8(self.possible_states.len() as u8);
		for states in &self.possible_states {
			states.encode(out);
		}
	}
}

/// State effecter record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEffecterPdr {
	/// Terminus handle of the owning terminus locator.
	pub terminus_handle: u16,
	/// Effecter id, unique within the terminus.
	pub effecter_id: u16,
	/// Entity the effecter controls.
	pub entity: Entity,
	/// Semantic id.
	pub effecter_semantic_id: u16,
	/// Initialization hint.
	pub effecter_init: u8,
	/// Whether a description record exists.
	pub has_description_pdr: bool,
	/// One block per composite effecter offset.
	pub possible_states: Vec<PossibleStates>,
}

impl StateEffecterPdr {
	/// Offset of the entity container id within an encoded record.
	pub const CONTAINER_ID_OFFSET: usize = PdrHeader::LEN + 8;

	/// Rewrites the entity container id of an encoded state effecter record.
	pub fn set_container_id(record: &mut [u8], container_id: u16) -> Result<(), DecodeError> {
		patch(record, Self::CONTAINER_ID_OFFSET, &container_id.to_le_bytes(), "state_effecter.container_id")
	}
}

impl PdrBody for StateEffecterPdr {
	const TYPE: PdrType = PdrType::StateEffecter;

	fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
		Ok(Self {
			terminus_handle: r.u16("state_effecter.terminus_handle")?,
			effecter_id: r.u16("state_effecter.effecter_id")?,
			entity: Entity::decode(r)?,
			effecter_semantic_id: r.u16("state_effecter.semantic_id")?,
			effecter_init: r.u8("state_effecter.effecter_init")?,
			has_description_pdr: r.u8("state_effecter.description_pdr")? != 0,
			possible_states: decode_composite(r, "state_effecter.composite_count")?,
		})
	}

	fn encode_body(&self, out: &mut Vec<u8>) {
		out.put_u16_le(self.terminus_handle);
		out.put_u16_le(self.effecter_id);
		self.entity.encode(out);
		out.put_u16_le(self.effecter_semantic_id);
		out.put_u8(self.effecter_init);
		out.put_u8(self.has_description_pdr as u8);
		out.put_u8(self.possible_states.len() as u8);
		for states in &self.possible_states {
			states.encode(out);
		}
	}
}

/// How a terminus can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminusLocator {
	/// MCTP endpoint id.
	MctpEid(Eid),
	/// Any other locator type, kept raw.
	Other {
		/// Locator type code.
		kind: u8,
		/// Locator value bytes.
		value: Vec<u8>,
	},
}

impl TerminusLocator {
	const MCTP_EID: u8 = 1;
}

/// Terminus locator record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminusLocatorPdr {
	/// Handle other records use to refer to this terminus.
	pub terminus_handle: u16,
	/// Whether the terminus is currently reachable.
	pub valid: bool,
	/// Terminus id.
	pub tid: TerminusId,
	/// Container id of the terminus entity.
	pub container_id: u16,
	/// Locator of the terminus.
	pub locator: TerminusLocator,
}

impl TerminusLocatorPdr {
	/// Offset of the validity byte within an encoded record.
	pub const VALIDITY_OFFSET: usize = PdrHeader::LEN + 2;

	/// Rewrites the validity byte of an encoded terminus locator record.
	pub fn set_validity(record: &mut [u8], valid: bool) -> Result<(), DecodeError> {
		patch(record, Self::VALIDITY_OFFSET, &[valid as u8], "terminus_locator.validity")
	}

	/// Endpoint id when the locator is MCTP.
	pub fn eid(&self) -> Option<Eid> {
		match self.locator {
			TerminusLocator::MctpEid(eid) => Some(eid),
			TerminusLocator::Other { .. } => None,
		}
	}
}

impl PdrBody for TerminusLocatorPdr {
	const TYPE: PdrType = PdrType::TerminusLocator;

	fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
		let terminus_handle = r.u16("terminus_locator.terminus_handle")?;
		let valid = r.u8("terminus_locator.validity")? != 0;
		let tid = TerminusId(r.u8("terminus_locator.tid")?);
		let container_id = r.u16("terminus_locator.container_id")?;
		let kind = r.u8("terminus_locator.type")?;
		let size = r.u8("terminus_locator.value_size")?;
		let value = r.bytes("terminus_locator.value", size as usize)?;
		let locator = match (kind, value) {
			(TerminusLocator::MCTP_EID, [eid]) => TerminusLocator::MctpEid(Eid(*eid)),
			(TerminusLocator::MCTP_EID, _) => {
				return Err(DecodeError::InvalidField { field: "terminus_locator.value_size", value: size as u32 });
			}
			(kind, value) => TerminusLocator::Other { kind, value: value.to_vec() },
		};
		Ok(Self { terminus_handle, valid, tid, container_id, locator })
	}

	fn encode_body(&self, out: &mut Vec<u8>) {
		out.put_u16_le(self.terminus_handle);
		out.put_u8(self.valid as u8);
		out.put_u8(self.tid.0);
		out.put_u16_le(self.container_id);
		match &self.locator {
			TerminusLocator::MctpEid(eid) => {
				out.put_u8(TerminusLocator::MCTP_EID);
				out.put_u8(1);
				out.put_u8(eid.0);
			}
			TerminusLocator::Other { kind, value } => {
				out.put_u8(*kind);
				out.put_u8(value.len() as u8);
				out.put_slice(value);
			}
		}
	}
}
