//! BMC-side host PDR exchange.
//!
//! The BMC keeps one PDR repository describing itself and the host. This
//! crate imports the host's records into it and keeps the derived state in
//! step:
//! * [`repo`]: the repository, split into a local and a host handle range
//! * [`tree`]: the entity containment tree host associations are merged into
//! * [`sensors`]: the state sensor index consulted by runtime events
//! * [`exchange`]: the synchronous fetch/merge/notify state machine
//! * [`driver`]: the async loop performing the exchange's requests

#![warn(missing_docs)]

pub mod driver;
pub mod exchange;
pub mod inventory;
pub mod repo;
pub mod sensors;
pub mod terminus;
pub mod tree;

pub use driver::{DriverClosed, DriverEvent, DriverHandle, ExchangeDriver};
pub use exchange::{
	ChangeNotification, ContainerFixup, CycleId, ExchangeConfig, ExchangeError, ExchangeState, ExchangeStats,
	FetchRequest, HostLink, HostPdrExchange, ImportedRecord, ResponseOutcome,
};
pub use inventory::{EntityNames, InventorySink, NoopInventory};
pub use repo::{Origin, PdrRecord, PdrRepo, RepoError};
pub use sensors::{
	SensorEntry, SensorEventHandler, SensorEventSink, SensorIndex, SensorInfo, SensorMap, SensorStateChange, StatusCode,
};
pub use terminus::{TerminusInfo, TerminusMap, Validity};
pub use tree::{Attach, EntityTree, Locality, NodeId, TreeError};
