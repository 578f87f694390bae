//! Length-delimited frames carrying PLDM messages.
//!
//! ```text
//! +---------+-----+-------------+---------+
//! | len u16 | eid | PLDM header | payload |
//! +---------+-----+-------------+---------+
//! ```
//!
//! `len` is little-endian and counts every byte after itself.

use bytes::{BufMut, BytesMut};
use pdrx_proto::{DecodeError, Eid, MessageHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{PldmMessage, TransportError};

const MIN_FRAME: usize = 1 + MessageHeader::LEN;

/// Reads one frame. Returns `None` on a clean end of stream between frames.
pub async fn read_frame<R>(input: &mut R) -> Result<Option<(Eid, PldmMessage)>, TransportError>
where
	R: AsyncRead + Unpin,
{
	let mut len = [0u8; 2];
	match input.read_exact(&mut len).await {
		Ok(_) => {}
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e.into()),
	}
	let len = u16::from_le_bytes(len) as usize;
	if len < MIN_FRAME {
		return Err(DecodeError::Truncated { field: "frame", needed: MIN_FRAME, remaining: len }.into());
	}
	let mut body = vec![0u8; len];
	input.read_exact(&mut body).await?;
	let eid = Eid(body[0]);
	let (header, payload) = MessageHeader::decode(&body[1..])?;
	Ok(Some((eid, PldmMessage::new(header, payload.to_vec()))))
}

/// Writes one frame and flushes.
pub async fn write_frame<W>(output: &mut W, eid: Eid, message: &PldmMessage) -> Result<(), TransportError>
where
	W: AsyncWrite + Unpin,
{
	let len = MIN_FRAME + message.payload.len();
	let Ok(len_field) = u16::try_from(len) else {
		return Err(DecodeError::InvalidField { field: "frame.len", value: len as u32 }.into());
	};
	let mut buf = BytesMut::with_capacity(2 + len);
	buf.put_u16_le(len_field);
	buf.put_u8(eid.0);
	message.header.encode(&mut buf);
	buf.put_slice(&message.payload);
	output.write_all(&buf).await?;
	output.flush().await?;
	Ok(())
}
