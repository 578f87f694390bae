//! Bounds-checked little-endian field reader.
//!
//! Every read names the field it decodes so truncation errors point at the
//! exact offset that was short.

use bytes::Buf;

use crate::DecodeError;

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
	buf: &'a [u8],
}

impl<'a> Reader<'a> {
	/// Starts reading at the beginning of `buf`.
	pub fn new(buf: &'a [u8]) -> Self {
		Self { buf }
	}

	/// Bytes not yet consumed.
	pub fn remaining(&self) -> usize {
		self.buf.len()
	}

	fn need(&self, field: &'static str, needed: usize) -> Result<(), DecodeError> {
		if self.buf.len() < needed {
			return Err(DecodeError::Truncated { field, needed, remaining: self.buf.len() });
		}
		Ok(())
	}

	/// Reads one byte.
	pub fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
		self.need(field, 1)?;
		Ok(self.buf.get_u8())
	}

	/// Reads a little-endian `u16`.
	pub fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
		self.need(field, 2)?;
		Ok(self.buf.get_u16_le())
	}

	/// Reads a little-endian `u32`.
	pub fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
		self.need(field, 4)?;
		Ok(self.buf.get_u32_le())
	}

	/// Reads exactly `len` bytes.
	pub fn bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
		self.need(field, len)?;
		let (head, tail) = self.buf.split_at(len);
		self.buf = tail;
		Ok(head)
	}

	/// Consumes and returns everything left.
	pub fn rest(&mut self) -> &'a [u8] {
		std::mem::take(&mut self.buf)
	}
}
