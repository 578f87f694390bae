//! Shared wire types for the host PDR exchange.
//!
//! This crate defines the PLDM messages the BMC exchanges with host firmware
//! for platform monitoring and control (DSP0248): the PLDM message header,
//! the PDR common header and the record layouts the exchange engine inspects,
//! GetPDR request/response bodies, and PlatformEventMessage bodies carrying
//! sensor events and PDR repository change events.
//!
//! All multi-byte fields are little-endian. Decoders never panic on short or
//! inconsistent input; they return [`DecodeError`].

#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod header;
pub mod pdr;
pub mod platform;
pub mod types;

pub use error::DecodeError;
pub use header::{MessageHeader, PldmType};
pub use pdr::{
	Entity, EntityAssociationPdr, PdrBody, PdrHeader, PdrType, PossibleStates, StateEffecterPdr, StateSensorPdr,
	TerminusLocator, TerminusLocatorPdr, set_record_handle,
};
pub use platform::{
	ChangeOperation, ChangeRecord, EventClass, EventDataFormat, GetPdrRequest, GetPdrResponse,
	GetStateSensorReadingsRequest, GetStateSensorReadingsResponse, PlatformEventRequest, PlatformEventResponse,
	RepositoryChangeEvent, SensorEvent, SensorEventData, StateSensorField, TransferFlag,
};
pub use types::*;

#[cfg(test)]
mod tests;
