//! Seeds the BMC's own entity tree and association records from config.

use pdrx_core::{EntityTree, Locality, Origin, PdrRepo};
use tracing::debug;

use crate::config::{Config, ConfigError};

/// Builds the repository and tree the exchange merges host records into.
///
/// Seeds are applied in file order, so a parent must be listed before its
/// children.
pub fn seed(config: &Config) -> Result<(PdrRepo, EntityTree), ConfigError> {
	let mut repo = PdrRepo::new(config.exchange.local_range, config.exchange.host_range);
	let mut tree = EntityTree::new();
	for seed in &config.topology {
		let entity = seed.entity();
		let Some(parent) = seed.parent() else {
			tree.add_root(entity, Origin::Local);
			continue;
		};
		let parent_id = tree.find(&parent, Locality::Exact).ok_or(ConfigError::UnknownParent {
			entity: seed.entity,
			parent: seed.parent.unwrap_or_default(),
		})?;
		tree.attach_child(parent_id, entity, Origin::Local)?;
		let (handle, _) = repo.associate(parent, seed.association_type(), entity)?;
		debug!(?entity, ?parent, handle, "seeded local entity");
	}
	Ok((repo, tree))
}
