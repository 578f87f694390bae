//! Daemon configuration file.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! setup for a single host terminus behind the default bridge socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pdrx_core::{ContainerFixup, EntityNames, ExchangeConfig, RepoError, TreeError};
use pdrx_proto::{Eid, Entity, EntityAssociationPdr, HandleRange, TerminusId};
use pdrx_rpc::RequesterConfig;
use serde::Deserialize;

/// Configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("reading {path}: {source}")]
	Read { path: PathBuf, source: std::io::Error },
	#[error("parsing {path}: {source}")]
	Parse { path: PathBuf, source: toml::de::Error },
	#[error("handle ranges overlap: local {local}, host {host}")]
	RangesOverlap { local: HandleRange, host: HandleRange },
	#[error("entity_names key {0:?} is not an entity type")]
	EntityType(String),
	#[error("topology entity {entity:?} names unknown parent {parent:?}")]
	UnknownParent { entity: [u16; 3], parent: [u16; 3] },
	#[error("topology: {0}")]
	Topology(#[from] TreeError),
	#[error("topology: {0}")]
	Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostSection {
	pub eid: Eid,
	pub tid: TerminusId,
}

impl Default for HostSection {
	fn default() -> Self {
		Self { eid: Eid(9), tid: TerminusId(1) }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BmcSection {
	pub tid: TerminusId,
}

impl Default for BmcSection {
	fn default() -> Self {
		Self { tid: TerminusId(1) }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixupSection {
	pub effecter_id: u16,
	pub entity_type: u16,
	pub entity_instance: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExchangeSection {
	pub local_range: HandleRange,
	pub host_range: HandleRange,
	pub inventory_root: String,
	/// Start a resync as soon as the transport is up.
	pub fetch_on_start: bool,
	pub container_fixups: Vec<FixupSection>,
}

impl Default for ExchangeSection {
	fn default() -> Self {
		let defaults = ExchangeConfig::default();
		Self {
			local_range: defaults.local_range,
			host_range: defaults.host_range,
			inventory_root: defaults.inventory_root,
			fetch_on_start: true,
			container_fixups: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequesterSection {
	pub response_timeout_ms: u64,
	pub retries: u8,
}

impl Default for RequesterSection {
	fn default() -> Self {
		let defaults = RequesterConfig::default();
		Self { response_timeout_ms: defaults.response_timeout.as_millis() as u64, retries: defaults.retries }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSection {
	/// Unix socket of the MCTP bridge.
	pub socket: PathBuf,
	/// Delay between attempts to reach the bridge.
	pub reconnect_ms: u64,
}

impl Default for TransportSection {
	fn default() -> Self {
		Self { socket: PathBuf::from("/run/pdrx/mctp.sock"), reconnect_ms: 1000 }
	}
}

/// One BMC-modelled entity. Entities without a parent are tree roots.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologySeed {
	/// `[entity_type, instance_number, container_id]`
	pub entity: [u16; 3],
	#[serde(default)]
	pub parent: Option<[u16; 3]>,
	#[serde(default)]
	pub logical: bool,
}

impl TopologySeed {
	pub fn entity(&self) -> Entity {
		let [ty, instance, container] = self.entity;
		Entity::new(ty, instance, container)
	}

	pub fn parent(&self) -> Option<Entity> {
		self.parent.map(|[ty, instance, container]| Entity::new(ty, instance, container))
	}

	pub fn association_type(&self) -> u8 {
		if self.logical { EntityAssociationPdr::LOGICAL } else { EntityAssociationPdr::PHYSICAL }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	pub host: HostSection,
	pub bmc: BmcSection,
	pub exchange: ExchangeSection,
	pub requester: RequesterSection,
	pub transport: TransportSection,
	pub topology: Vec<TopologySeed>,
	/// Entity type (decimal string) to inventory path segment name.
	pub entity_names: std::collections::BTreeMap<String, String>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			host: HostSection::default(),
			bmc: BmcSection::default(),
			exchange: ExchangeSection::default(),
			requester: RequesterSection::default(),
			transport: TransportSection::default(),
			topology: vec![TopologySeed { entity: [11521, 1, 0], parent: None, logical: false }],
			entity_names: Default::default(),
		}
	}
}

impl Config {
	/// Reads and validates the file at `path`.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text =
			std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
		let config: Self =
			toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let (local, host) = (self.exchange.local_range, self.exchange.host_range);
		if local.overlaps(&host) {
			return Err(ConfigError::RangesOverlap { local, host });
		}
		self.entity_names()?;
		Ok(())
	}

	pub fn exchange_config(&self) -> ExchangeConfig {
		ExchangeConfig {
			host_tid: self.host.tid,
			host_eid: self.host.eid,
			bmc_tid: self.bmc.tid,
			local_range: self.exchange.local_range,
			host_range: self.exchange.host_range,
			inventory_root: self.exchange.inventory_root.clone(),
			container_fixups: self
				.exchange
				.container_fixups
				.iter()
				.map(|f| ContainerFixup {
					effecter_id: f.effecter_id,
					entity_type: f.entity_type,
					entity_instance: f.entity_instance,
				})
				.collect(),
		}
	}

	pub fn requester_config(&self) -> RequesterConfig {
		RequesterConfig {
			response_timeout: Duration::from_millis(self.requester.response_timeout_ms),
			retries: self.requester.retries,
		}
	}

	pub fn reconnect_interval(&self) -> Duration {
		Duration::from_millis(self.transport.reconnect_ms)
	}

	pub fn entity_names(&self) -> Result<EntityNames, ConfigError> {
		let overrides = self
			.entity_names
			.iter()
			.map(|(ty, name)| {
				let ty = ty.parse::<u16>().map_err(|_| ConfigError::EntityType(ty.clone()))?;
				Ok((ty, name.clone()))
			})
			.collect::<Result<Vec<_>, ConfigError>>()?;
		Ok(EntityNames::with_overrides(overrides))
	}
}

#[cfg(test)]
mod tests;
