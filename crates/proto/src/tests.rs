use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;

fn association() -> EntityAssociationPdr {
	EntityAssociationPdr {
		container_id: 7,
		association_type: EntityAssociationPdr::PHYSICAL,
		container: Entity::new(64, 1, 0),
		children: vec![Entity::new(135, 1, 7), Entity::new(66, 2, 7)],
	}
}

#[test]
fn association_record_layout() {
	let record = association().to_record(0x0100_0004);
	assert_eq!(record.len(), PdrHeader::LEN + 10 + 12);
	assert_eq!(&record[..4], &0x0100_0004u32.to_le_bytes());
	assert_eq!(record[5], 15);
	assert_eq!(u16::from_le_bytes([record[8], record[9]]) as usize, record.len() - PdrHeader::LEN);

	let (header, decoded) = EntityAssociationPdr::decode(&record).unwrap();
	assert_eq!(header.record_handle, 0x0100_0004);
	assert_eq!(header.pdr_type, PdrType::EntityAssociation);
	assert_eq!(decoded, association());
}

#[test]
fn declared_length_past_end_is_rejected() {
	let mut record = association().to_record(9);
	record.truncate(record.len() - 3);
	assert_eq!(
		PdrHeader::split(&record),
		Err(DecodeError::LengthMismatch { handle: 9, declared: 22, actual: 19 })
	);
}

#[test]
fn wrong_type_is_rejected() {
	let record = association().to_record(1);
	assert_eq!(
		StateSensorPdr::decode(&record).unwrap_err(),
		DecodeError::UnexpectedType { expected: 4, found: 15 }
	);
}

#[test]
fn set_record_handle_rewrites_header_only() {
	let mut record = association().to_record(1);
	set_record_handle(&mut record, 0x0100_0042).unwrap();
	let (header, body) = EntityAssociationPdr::decode(&record).unwrap();
	assert_eq!(header.record_handle, 0x0100_0042);
	assert_eq!(body, association());
	assert!(set_record_handle(&mut [0u8; 3], 1).is_err());
}

#[rstest]
#[case::single_byte(&[0, 3, 7], 1, &[0b1000_1001])]
#[case::second_byte(&[1, 9], 2, &[0b0000_0010, 0b0000_0010])]
#[case::empty_set(&[], 1, &[0])]
fn possible_states_bitfield(#[case] states: &[u8], #[case] size: u8, #[case] bits: &[u8]) {
	let sensor = StateSensorPdr {
		terminus_handle: 1,
		sensor_id: 3,
		entity: Entity::new(135, 1, 7),
		sensor_init: 0,
		has_aux_names: false,
		possible_states: vec![PossibleStates { state_set_id: 1, states: states.iter().copied().collect() }],
	};
	let record = sensor.to_record(1);
	let body = &record[PdrHeader::LEN..];
	// terminus, sensor, entity (6), init, aux, composite count, then the block
	let block = &body[13..];
	assert_eq!(u16::from_le_bytes([block[0], block[1]]), 1);
	assert_eq!(block[2], size);
	assert_eq!(&block[3..], bits);

	let (_, decoded) = StateSensorPdr::decode(&record).unwrap();
	assert_eq!(decoded, sensor);
}

#[test]
fn possible_states_size_zero_is_invalid() {
	let mut record = StateSensorPdr {
		terminus_handle: 1,
		sensor_id: 3,
		entity: Entity::new(135, 1, 7),
		sensor_init: 0,
		has_aux_names: false,
		possible_states: vec![PossibleStates { state_set_id: 1, states: BTreeSet::from([1]) }],
	}
	.to_record(1);
	record[PdrHeader::LEN + 15] = 0;
	assert_eq!(
		StateSensorPdr::decode(&record).unwrap_err(),
		DecodeError::InvalidField { field: "possible_states.size", value: 0 }
	);
}

#[test]
fn effecter_container_id_patch() {
	let effecter = StateEffecterPdr {
		terminus_handle: 1,
		effecter_id: 0x20,
		entity: Entity::new(33, 0, 0),
		effecter_semantic_id: 0,
		effecter_init: 0,
		has_description_pdr: false,
		possible_states: vec![PossibleStates { state_set_id: 196, states: BTreeSet::from([1, 2]) }],
	};
	let mut record = effecter.to_record(5);
	StateEffecterPdr::set_container_id(&mut record, 0x33).unwrap();
	let (_, decoded) = StateEffecterPdr::decode(&record).unwrap();
	assert_eq!(decoded.entity, Entity::new(33, 0, 0x33));
	assert_eq!(decoded.possible_states, effecter.possible_states);
}

#[test]
fn terminus_locator_validity_patch() {
	let locator = TerminusLocatorPdr {
		terminus_handle: 1,
		valid: true,
		tid: TerminusId(1),
		container_id: 0,
		locator: TerminusLocator::MctpEid(Eid(9)),
	};
	let mut record = locator.to_record(0x0100_0000);
	TerminusLocatorPdr::set_validity(&mut record, false).unwrap();
	let (_, decoded) = TerminusLocatorPdr::decode(&record).unwrap();
	assert!(!decoded.valid);
	assert_eq!(decoded.eid(), Some(Eid(9)));
}

#[test]
fn message_header_bits() {
	let mut out = Vec::new();
	MessageHeader::request(InstanceId(5), PldmType::Platform, platform::GET_PDR).encode(&mut out);
	assert_eq!(out, vec![0x85, 0x02, 0x51]);

	let (header, rest) = MessageHeader::decode(&[0x05, 0x02, 0x51, 0xAA]).unwrap();
	assert!(!header.request);
	assert_eq!(header.instance_id, InstanceId(5));
	assert_eq!(header.pldm_type, PldmType::Platform);
	assert_eq!(rest, &[0xAA]);

	assert!(MessageHeader::decode(&[0x80, 0x42, 0x51]).is_err());
}

#[test]
fn get_pdr_request_layout() {
	let bytes = GetPdrRequest::first_part(0x0100_0001).encode();
	assert_eq!(bytes, vec![0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0x01, 0xFF, 0xFF, 0, 0]);
	assert_eq!(GetPdrRequest::decode(&bytes).unwrap(), GetPdrRequest::first_part(0x0100_0001));
}

#[test]
fn get_pdr_response_single_part() {
	let response = GetPdrResponse::single(7, vec![1, 2, 3]);
	let decoded = GetPdrResponse::decode(&response.encode()).unwrap();
	assert_eq!(decoded, response);
	assert_eq!(decoded.into_single_record().unwrap(), vec![1, 2, 3]);
}

#[test]
fn get_pdr_response_multipart_is_not_a_single_record() {
	let mut response = GetPdrResponse::single(7, vec![1, 2, 3]);
	response.transfer_flag = TransferFlag::End;
	response.transfer_crc = Some(0x5A);
	let decoded = GetPdrResponse::decode(&response.encode()).unwrap();
	assert_eq!(decoded.transfer_crc, Some(0x5A));
	assert!(decoded.into_single_record().is_err());
}

#[rstest]
#[case::error_code_only(&[0x82], true)]
#[case::truncated_record(&[0x00, 1, 0, 0, 0, 0, 0, 0, 0, 0x05, 4, 0, 1, 2], false)]
#[case::bad_transfer_flag(&[0x00, 1, 0, 0, 0, 0, 0, 0, 0, 0x09, 0, 0], false)]
#[case::empty(&[], false)]
fn get_pdr_response_decode_edges(#[case] bytes: &[u8], #[case] ok: bool) {
	let decoded = GetPdrResponse::decode(bytes);
	assert_eq!(decoded.is_ok(), ok, "{decoded:?}");
	if let Ok(response) = decoded {
		assert_eq!(response.completion_code, CompletionCode::INVALID_RECORD_HANDLE);
	}
}

#[test]
fn repository_change_event_layout() {
	let event = RepositoryChangeEvent {
		format: EventDataFormat::FormatIsPdrHandles,
		records: vec![
			ChangeRecord { operation: ChangeOperation::RecordsAdded, entries: vec![0x0100_0000] },
			ChangeRecord { operation: ChangeOperation::RecordsModified, entries: vec![3, 4] },
		],
	};
	let bytes = event.encode().unwrap();
	assert_eq!(&bytes[..4], &[2, 2, 2, 1]);
	assert_eq!(RepositoryChangeEvent::decode(&bytes).unwrap(), event);

	let request = PlatformEventRequest::new(TerminusId(1), EventClass::PdrRepositoryChange, bytes.clone());
	let encoded = request.encode();
	assert_eq!(&encoded[..3], &[1, 1, 4]);
	assert_eq!(PlatformEventRequest::decode(&encoded).unwrap(), request);
}

#[test]
fn repository_change_event_counts_must_fit_a_byte() {
	let records = |n: usize| ChangeRecord { operation: ChangeOperation::RecordsAdded, entries: vec![7; n] };
	let event = RepositoryChangeEvent { format: EventDataFormat::FormatIsPdrHandles, records: vec![records(256)] };
	assert_eq!(
		event.encode(),
		Err(DecodeError::InvalidField { field: "repo_change.num_entries", value: 256 })
	);

	let event = RepositoryChangeEvent { format: EventDataFormat::FormatIsPdrHandles, records: vec![records(1); 256] };
	assert_eq!(
		event.encode(),
		Err(DecodeError::InvalidField { field: "repo_change.num_change_records", value: 256 })
	);

	let event = RepositoryChangeEvent { format: EventDataFormat::FormatIsPdrHandles, records: vec![records(255); 255] };
	let bytes = event.encode().unwrap();
	assert_eq!(&bytes[..4], &[2, 255, 2, 255]);
}

#[test]
fn state_sensor_readings_layout() {
	let request = GetStateSensorReadingsRequest::new(0x0102);
	assert_eq!(request.encode(), vec![0x02, 0x01, 0x00, 0x00]);
	assert_eq!(GetStateSensorReadingsRequest::decode(&request.encode()).unwrap(), request);

	let response = GetStateSensorReadingsResponse {
		completion_code: CompletionCode::SUCCESS,
		fields: vec![StateSensorField::enabled(2), StateSensorField { operational_state: 1, ..StateSensorField::enabled(0) }],
	};
	let bytes = response.encode().unwrap();
	assert_eq!(bytes, vec![0x00, 2, 0, 2, 2, 2, 1, 0, 0, 0]);
	let decoded = GetStateSensorReadingsResponse::decode(&bytes).unwrap();
	assert_eq!(decoded, response);
	assert!(decoded.fields[0].is_enabled());
	assert!(!decoded.fields[1].is_enabled());
}

#[rstest]
#[case::error_code(&[0x01], Some(0))]
#[case::short_field(&[0x00, 1, 0, 2, 2], None)]
#[case::no_fields(&[0x00, 0], Some(0))]
fn state_sensor_readings_decode_edges(#[case] bytes: &[u8], #[case] fields: Option<usize>) {
	let decoded = GetStateSensorReadingsResponse::decode(bytes);
	assert_eq!(decoded.as_ref().ok().map(|r| r.fields.len()), fields, "{decoded:?}");
}

#[test]
fn sensor_event_state_class() {
	let bytes = [0x05, 0x00, 0x01, 0x00, 0x02, 0x01];
	let event = SensorEvent::decode(&bytes).unwrap();
	assert_eq!(
		event,
		SensorEvent {
			sensor_id: 5,
			data: SensorEventData::StateSensorState { offset: 0, event_state: 2, previous_event_state: 1 },
		}
	);
	assert_eq!(event.encode(), bytes.to_vec());
}

#[test]
fn platform_event_response_error_has_no_status() {
	let response = PlatformEventResponse { completion_code: CompletionCode::ERROR, status: 0 };
	assert_eq!(response.encode(), vec![0x01]);
	assert_eq!(PlatformEventResponse::decode(&[0x01]).unwrap(), response);
	assert!(PlatformEventResponse::decode(&[0x00]).is_err());
}

#[test]
fn default_handle_ranges_are_disjoint() {
	assert!(!HandleRange::LOCAL.overlaps(&HandleRange::HOST));
	assert!(HandleRange::HOST.contains(0x0100_0000));
	assert!(!HandleRange::LOCAL.contains(TERMINATOR));
}
