//! Platform monitoring and control command bodies.
//!
//! Bodies exclude the PLDM message header. Response bodies start with the
//! completion code; when it is not success the rest of the body is absent.

use bytes::BufMut;

use crate::codec::Reader;
use crate::{CompletionCode, DecodeError, RecordHandle, TerminusId};

/// `GetPDR` command code.
pub const GET_PDR: u8 = 0x51;
/// `PlatformEventMessage` command code.
pub const PLATFORM_EVENT_MESSAGE: u8 = 0x0A;
/// `GetStateSensorReadings` command code.
pub const GET_STATE_SENSOR_READINGS: u8 = 0x21;

/// Transfer operation flag requesting the first (or only) part of a record.
pub const GET_FIRST_PART: u8 = 0x01;

/// GetPDR request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPdrRequest {
	/// Handle of the record to fetch, 0 for the first record.
	pub record_handle: RecordHandle,
	/// Transfer handle for multipart transfers.
	pub data_transfer_handle: u32,
	/// Transfer operation flag.
	pub transfer_op_flag: u8,
	/// Maximum record bytes the requester accepts.
	pub request_count: u16,
	/// Change number of the record, 0 on the first part.
	pub record_change_number: u16,
}

impl GetPdrRequest {
	/// Encoded size.
	pub const LEN: usize = 13;

	/// Single-part request for the whole record at `record_handle`.
	pub fn first_part(record_handle: RecordHandle) -> Self {
		Self {
			record_handle,
			data_transfer_handle: 0,
			transfer_op_flag: GET_FIRST_PART,
			request_count: u16::MAX,
			record_change_number: 0,
		}
	}

	/// Encodes the body.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(Self::LEN);
		out.put_u32_le(self.record_handle);
		out.put_u32_le(self.data_transfer_handle);
		out.put_u8(self.transfer_op_flag);
		out.put_u16_le(self.request_count);
		out.put_u16_le(self.record_change_number);
		out
	}

	/// Decodes a request body.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		Ok(Self {
			record_handle: r.u32("get_pdr.record_handle")?,
			data_transfer_handle: r.u32("get_pdr.data_transfer_handle")?,
			transfer_op_flag: r.u8("get_pdr.transfer_op_flag")?,
			request_count: r.u16("get_pdr.request_count")?,
			record_change_number: r.u16("get_pdr.record_change_number")?,
		})
	}
}

/// Position of a GetPDR response part within a record transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFlag {
	/// First part of a multipart transfer.
	Start,
	/// Middle part of a multipart transfer.
	Middle,
	/// Last part of a multipart transfer. Carries a CRC.
	End,
	/// The whole record in one part.
	StartAndEnd,
}

impl TryFrom<u8> for TransferFlag {
	type Error = DecodeError;

	fn try_from(raw: u8) -> Result<Self, Self::Error> {
		match raw {
			0x00 => Ok(Self::Start),
			0x01 => Ok(Self::Middle),
			0x04 => Ok(Self::End),
			0x05 => Ok(Self::StartAndEnd),
			other => Err(DecodeError::InvalidField { field: "get_pdr.transfer_flag", value: other as u32 }),
		}
	}
}

impl From<TransferFlag> for u8 {
	fn from(flag: TransferFlag) -> Self {
		match flag {
			TransferFlag::Start => 0x00,
			TransferFlag::Middle => 0x01,
			TransferFlag::End => 0x04,
			TransferFlag::StartAndEnd => 0x05,
		}
	}
}

/// GetPDR response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPdrResponse {
	/// Completion code.
	pub completion_code: CompletionCode,
	/// Handle of the next record, [`crate::TERMINATOR`] after the last one.
	pub next_record_handle: RecordHandle,
	/// Transfer handle for the next part.
	pub next_data_transfer_handle: u32,
	/// Part position.
	pub transfer_flag: TransferFlag,
	/// Record bytes carried by this part.
	pub record_data: Vec<u8>,
	/// CRC over the whole record, present on [`TransferFlag::End`] only.
	pub transfer_crc: Option<u8>,
}

impl GetPdrResponse {
	/// Successful single-part response carrying `record`.
	pub fn single(next_record_handle: RecordHandle, record: Vec<u8>) -> Self {
		Self {
			completion_code: CompletionCode::SUCCESS,
			next_record_handle,
			next_data_transfer_handle: 0,
			transfer_flag: TransferFlag::StartAndEnd,
			record_data: record,
			transfer_crc: None,
		}
	}

	/// Encodes the body.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(12 + self.record_data.len());
		out.put_u8(self.completion_code.0);
		if !self.completion_code.is_success() {
			return out;
		}
		out.put_u32_le(self.next_record_handle);
		out.put_u32_le(self.next_data_transfer_handle);
		out.put_u8(self.transfer_flag.into());
		out.put_u16_le(self.record_data.len() as u16);
		out.put_slice(&self.record_data);
		if let Some(crc) = self.transfer_crc {
			out.put_u8(crc);
		}
		out
	}

	/// Decodes a response body.
	///
	/// A non-success completion code decodes to a response with no record
	/// data; callers check [`GetPdrResponse::completion_code`] first.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		let completion_code = CompletionCode(r.u8("get_pdr.completion_code")?);
		if !completion_code.is_success() {
			return Ok(Self {
				completion_code,
				next_record_handle: 0,
				next_data_transfer_handle: 0,
				transfer_flag: TransferFlag::StartAndEnd,
				record_data: Vec::new(),
				transfer_crc: None,
			});
		}
		let next_record_handle = r.u32("get_pdr.next_record_handle")?;
		let next_data_transfer_handle = r.u32("get_pdr.next_data_transfer_handle")?;
		let transfer_flag = TransferFlag::try_from(r.u8("get_pdr.transfer_flag")?)?;
		let count = r.u16("get_pdr.response_count")?;
		let record_data = r.bytes("get_pdr.record_data", count as usize)?.to_vec();
		let transfer_crc = match transfer_flag {
			TransferFlag::End => Some(r.u8("get_pdr.transfer_crc")?),
			_ => None,
		};
		Ok(Self { completion_code, next_record_handle, next_data_transfer_handle, transfer_flag, record_data, transfer_crc })
	}

	/// Returns the record when the response carries a complete single-part transfer.
	pub fn into_single_record(self) -> Result<Vec<u8>, DecodeError> {
		match self.transfer_flag {
			TransferFlag::StartAndEnd => Ok(self.record_data),
			flag => Err(DecodeError::InvalidField { field: "get_pdr.transfer_flag", value: u8::from(flag) as u32 }),
		}
	}
}

/// Class of a platform event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
	/// Sensor event.
	Sensor,
	/// Effecter event.
	Effecter,
	/// PDR repository change event.
	PdrRepositoryChange,
	/// Message poll event.
	MessagePoll,
	/// Heartbeat timer elapsed.
	HeartbeatTimerElapsed,
	/// Any other class.
	Other(u8),
}

impl From<u8> for EventClass {
	fn from(raw: u8) -> Self {
		match raw {
			0x00 => Self::Sensor,
			0x01 => Self::Effecter,
			0x04 => Self::PdrRepositoryChange,
			0x05 => Self::MessagePoll,
			0x06 => Self::HeartbeatTimerElapsed,
			other => Self::Other(other),
		}
	}
}

impl From<EventClass> for u8 {
	fn from(class: EventClass) -> Self {
		match class {
			EventClass::Sensor => 0x00,
			EventClass::Effecter => 0x01,
			EventClass::PdrRepositoryChange => 0x04,
			EventClass::MessagePoll => 0x05,
			EventClass::HeartbeatTimerElapsed => 0x06,
			EventClass::Other(raw) => raw,
		}
	}
}

/// PlatformEventMessage request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEventRequest {
	/// Event message format version.
	pub format_version: u8,
	/// Terminus that generated the event.
	pub tid: TerminusId,
	/// Event class.
	pub event_class: EventClass,
	/// Class-specific event data.
	pub event_data: Vec<u8>,
}

impl PlatformEventRequest {
	/// Format version written on outgoing events.
	pub const FORMAT_VERSION: u8 = 0x01;

	/// Creates an event with the current format version.
	pub fn new(tid: TerminusId, event_class: EventClass, event_data: Vec<u8>) -> Self {
		Self { format_version: Self::FORMAT_VERSION, tid, event_class, event_data }
	}

	/// Encodes the body.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(3 + self.event_data.len());
		out.put_u8(self.format_version);
		out.put_u8(self.tid.0);
		out.put_u8(self.event_class.into());
		out.put_slice(&self.event_data);
		out
	}

	/// Decodes a request body.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		Ok(Self {
			format_version: r.u8("platform_event.format_version")?,
			tid: TerminusId(r.u8("platform_event.tid")?),
			event_class: EventClass::from(r.u8("platform_event.event_class")?),
			event_data: r.rest().to_vec(),
		})
	}
}

/// PlatformEventMessage response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformEventResponse {
	/// Completion code.
	pub completion_code: CompletionCode,
	/// Platform event status, meaningful on success only.
	pub status: u8,
}

impl PlatformEventResponse {
	/// Event was accepted without logging.
	pub const NO_LOGGING: u8 = 0x00;
	/// Event was accepted and logged.
	pub const EVENT_LOGGED: u8 = 0x02;

	/// Encodes the body.
	pub fn encode(&self) -> Vec<u8> {
		if self.completion_code.is_success() {
			vec![self.completion_code.0, self.status]
		} else {
			vec![self.completion_code.0]
		}
	}

	/// Decodes a response body.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		let completion_code = CompletionCode(r.u8("platform_event.completion_code")?);
		let status = if completion_code.is_success() { r.u8("platform_event.status")? } else { 0 };
		Ok(Self { completion_code, status })
	}
}

/// Data format of a PDR repository change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDataFormat {
	/// The whole repository changed. No change records follow.
	RefreshEntireRepository,
	/// Change records list PDR types.
	FormatIsPdrTypes,
	/// Change records list record handles.
	FormatIsPdrHandles,
}

impl TryFrom<u8> for EventDataFormat {
	type Error = DecodeError;

	fn try_from(raw: u8) -> Result<Self, Self::Error> {
		match raw {
			0 => Ok(Self::RefreshEntireRepository),
			1 => Ok(Self::FormatIsPdrTypes),
			2 => Ok(Self::FormatIsPdrHandles),
			other => Err(DecodeError::InvalidField { field: "repo_change.format", value: other as u32 }),
		}
	}
}

impl From<EventDataFormat> for u8 {
	fn from(format: EventDataFormat) -> Self {
		match format {
			EventDataFormat::RefreshEntireRepository => 0,
			EventDataFormat::FormatIsPdrTypes => 1,
			EventDataFormat::FormatIsPdrHandles => 2,
		}
	}
}

/// Operation of one change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
	/// Every record changed.
	RefreshAllRecords,
	/// Listed records were deleted.
	RecordsDeleted,
	/// Listed records were added.
	RecordsAdded,
	/// Listed records were modified.
	RecordsModified,
}

impl TryFrom<u8> for ChangeOperation {
	type Error = DecodeError;

	fn try_from(raw: u8) -> Result<Self, Self::Error> {
		match raw {
			0 => Ok(Self::RefreshAllRecords),
			1 => Ok(Self::RecordsDeleted),
			2 => Ok(Self::RecordsAdded),
			3 => Ok(Self::RecordsModified),
			other => Err(DecodeError::InvalidField { field: "repo_change.operation", value: other as u32 }),
		}
	}
}

impl From<ChangeOperation> for u8 {
	fn from(op: ChangeOperation) -> Self {
		match op {
			ChangeOperation::RefreshAllRecords => 0,
			ChangeOperation::RecordsDeleted => 1,
			ChangeOperation::RecordsAdded => 2,
			ChangeOperation::RecordsModified => 3,
		}
	}
}

/// One change record of a repository change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
	/// What happened to the listed entries.
	pub operation: ChangeOperation,
	/// Record handles or PDR types, depending on the event format.
	pub entries: Vec<u32>,
}

/// PDR repository change event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryChangeEvent {
	/// Data format.
	pub format: EventDataFormat,
	/// Change records, empty for [`EventDataFormat::RefreshEntireRepository`].
	pub records: Vec<ChangeRecord>,
}

impl RepositoryChangeEvent {
	/// Encodes the event data.
	///
	/// Fails when there are more than 255 change records, or when one record
	/// carries more than 255 entries. Both counts are single bytes on the wire.
	pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
		let mut out = Vec::new();
		out.put_u8(self.format.into());
		out.put_u8(count_u8("repo_change.num_change_records", self.records.len())?);
		for record in &self.records {
			out.put_u8(record.operation.into());
			out.put_u8(count_u8("repo_change.num_entries", record.entries.len())?);
			for entry in &record.entries {
				out.put_u32_le(*entry);
			}
		}
		Ok(out)
	}

	/// Decodes the event data.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		let format = EventDataFormat::try_from(r.u8("repo_change.format")?)?;
		let count = r.u8("repo_change.num_change_records")?;
		let mut records = Vec::with_capacity(count as usize);
		for _ in 0..count {
			let operation = ChangeOperation::try_from(r.u8("repo_change.operation")?)?;
			let entries = r.u8("repo_change.num_entries")?;
			let entries = (0..entries).map(|_| r.u32("repo_change.entry")).collect::<Result<Vec<_>, _>>()?;
			records.push(ChangeRecord { operation, entries });
		}
		Ok(Self { format, records })
	}
}

fn count_u8(field: &'static str, len: usize) -> Result<u8, DecodeError> {
	u8::try_from(len).map_err(|_| DecodeError::InvalidField { field, value: u32::try_from(len).unwrap_or(u32::MAX) })
}

/// Sensor event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEvent {
	/// Sensor that generated the event.
	pub sensor_id: u16,
	/// Class-specific payload.
	pub data: SensorEventData,
}

/// Payload of a sensor event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEventData {
	/// A state sensor changed state.
	StateSensorState {
		/// Composite sensor offset.
		offset: u8,
		/// New state.
		event_state: u8,
		/// Previous state.
		previous_event_state: u8,
	},
	/// Any other sensor event class, kept raw.
	Other {
		/// Sensor event class.
		class: u8,
		/// Class-specific bytes.
		raw: Vec<u8>,
	},
}

impl SensorEvent {
	const STATE_SENSOR_STATE: u8 = 0x01;

	/// Encodes the event data.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::new();
		out.put_u16_le(self.sensor_id);
		match &self.data {
			SensorEventData::StateSensorState { offset, event_state, previous_event_state } => {
				out.put_u8(Self::STATE_SENSOR_STATE);
				out.put_u8(*offset);
				out.put_u8(*event_state);
				out.put_u8(*previous_event_state);
			}
			SensorEventData::Other { class, raw } => {
				out.put_u8(*class);
				out.put_slice(raw);
			}
		}
		out
	}

	/// Decodes the event data.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		let sensor_id = r.u16("sensor_event.sensor_id")?;
		let class = r.u8("sensor_event.class")?;
		let data = if class == Self::STATE_SENSOR_STATE {
			SensorEventData::StateSensorState {
				offset: r.u8("sensor_event.offset")?,
				event_state: r.u8("sensor_event.event_state")?,
				previous_event_state: r.u8("sensor_event.previous_event_state")?,
			}
		} else {
			SensorEventData::Other { class, raw: r.rest().to_vec() }
		};
		Ok(Self { sensor_id, data })
	}
}

/// GetStateSensorReadings request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetStateSensorReadingsRequest {
	/// Sensor to read.
	pub sensor_id: u16,
	/// Bit per composite offset asking the terminus to re-arm event state.
	pub sensor_rearm: u8,
}

impl GetStateSensorReadingsRequest {
	/// Encoded size.
	pub const LEN: usize = 4;

	/// Reads `sensor_id` without re-arming any offset.
	pub fn new(sensor_id: u16) -> Self {
		Self { sensor_id, sensor_rearm: 0 }
	}

	/// Encodes the body.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(Self::LEN);
		out.put_u16_le(self.sensor_id);
		out.put_u8(self.sensor_rearm);
		out.put_u8(0);
		out
	}

	/// Decodes a request body.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		let sensor_id = r.u16("state_readings.sensor_id")?;
		let sensor_rearm = r.u8("state_readings.sensor_rearm")?;
		r.u8("state_readings.reserved")?;
		Ok(Self { sensor_id, sensor_rearm })
	}
}

/// Reading of one composite offset of a state sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSensorField {
	/// Operational state of the sensor.
	pub operational_state: u8,
	/// Present state.
	pub present_state: u8,
	/// State before the last change.
	pub previous_state: u8,
	/// State that generated the last event.
	pub event_state: u8,
}

impl StateSensorField {
	/// Operational state of an enabled sensor.
	pub const ENABLED: u8 = 0x00;

	/// Enabled field reporting `state` as present and event state.
	pub fn enabled(state: u8) -> Self {
		Self { operational_state: Self::ENABLED, present_state: state, previous_state: state, event_state: state }
	}

	/// Whether the present state is meaningful.
	pub fn is_enabled(&self) -> bool {
		self.operational_state == Self::ENABLED
	}

	fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
		Ok(Self {
			operational_state: r.u8("state_readings.operational_state")?,
			present_state: r.u8("state_readings.present_state")?,
			previous_state: r.u8("state_readings.previous_state")?,
			event_state: r.u8("state_readings.event_state")?,
		})
	}
}

/// GetStateSensorReadings response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetStateSensorReadingsResponse {
	/// Completion code.
	pub completion_code: CompletionCode,
	/// One field per composite offset, empty on failure.
	pub fields: Vec<StateSensorField>,
}

impl GetStateSensorReadingsResponse {
	/// Encodes the body.
	pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
		let mut out = Vec::with_capacity(2 + 4 * self.fields.len());
		out.put_u8(self.completion_code.0);
		if !self.completion_code.is_success() {
			return Ok(out);
		}
		out.put_u8(count_u8("state_readings.composite_count", self.fields.len())?);
		for field in &self.fields {
			out.put_u8(field.operational_state);
			out.put_u8(field.present_state);
			out.put_u8(field.previous_state);
			out.put_u8(field.event_state);
		}
		Ok(out)
	}

	/// Decodes a response body.
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut r = Reader::new(buf);
		let completion_code = CompletionCode(r.u8("state_readings.completion_code")?);
		if !completion_code.is_success() {
			return Ok(Self { completion_code, fields: Vec::new() });
		}
		let count = r.u8("state_readings.composite_count")?;
		let fields = (0..count).map(|_| StateSensorField::read(&mut r)).collect::<Result<Vec<_>, _>>()?;
		Ok(Self { completion_code, fields })
	}
}
