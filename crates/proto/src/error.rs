//! Decode errors for PLDM message bodies and PDR records.

/// Failure to interpret a PLDM message body or a PDR record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
	/// The input ended before the named field could be read.
	#[error("truncated input while reading {field}: need {needed} bytes, have {remaining}")]
	Truncated {
		/// Field being decoded when the input ran out.
		field: &'static str,
		/// Bytes required for the field.
		needed: usize,
		/// Bytes left in the input.
		remaining: usize,
	},
	/// The PDR header declares more data than the record carries.
	#[error("record {handle:#x} declares {declared} data bytes but carries {actual}")]
	LengthMismatch {
		/// Handle from the record header.
		handle: u32,
		/// Data length declared in the header.
		declared: usize,
		/// Data bytes actually present after the header.
		actual: usize,
	},
	/// The record is not of the type the decoder expects.
	#[error("expected PDR type {expected}, found {found}")]
	UnexpectedType {
		/// Type the decoder handles.
		expected: u8,
		/// Type found in the record header.
		found: u8,
	},
	/// A field holds a value outside its defined domain.
	#[error("invalid {field}: {value:#x}")]
	InvalidField {
		/// Name of the offending field.
		field: &'static str,
		/// Raw value found on the wire.
		value: u32,
	},
}
