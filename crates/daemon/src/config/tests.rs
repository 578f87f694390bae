use std::path::Path;

use pretty_assertions::assert_eq;

use super::*;

fn write(dir: &Path, text: &str) -> PathBuf {
	let path = dir.join("pdrxd.toml");
	std::fs::write(&path, text).unwrap();
	path
}

#[test]
fn empty_file_yields_defaults() {
	let dir = tempfile::tempdir().unwrap();
	let config = Config::load(&write(dir.path(), "")).unwrap();
	assert_eq!(config, Config::default());
	assert_eq!(config.exchange_config().host_range, HandleRange::HOST);
	assert_eq!(config.requester_config(), RequesterConfig::default());
	assert!(config.exchange.fetch_on_start);
	assert_eq!(config.reconnect_interval(), Duration::from_secs(1));
}

#[test]
fn full_file_round_trips_into_engine_config() {
	let dir = tempfile::tempdir().unwrap();
	let text = r#"
		[host]
		eid = 10
		tid = 2

		[bmc]
		tid = 7

		[exchange]
		local_range = { start = 1, end = 0xFFFF }
		host_range = { start = 0x10000, end = 0x1FFFF }
		inventory_root = "/inv"
		fetch_on_start = false

		[[exchange.container_fixups]]
		effecter_id = 12
		entity_type = 120
		entity_instance = 1

		[requester]
		response_timeout_ms = 500
		retries = 0

		[transport]
		socket = "/tmp/bridge.sock"
		reconnect_ms = 250

		[[topology]]
		entity = [11521, 1, 0]

		[[topology]]
		entity = [45, 1, 1]
		parent = [11521, 1, 0]

		[entity_names]
		45 = "enclosure"
	"#;
	let config = Config::load(&write(dir.path(), text)).unwrap();

	let exchange = config.exchange_config();
	assert_eq!(exchange.host_eid, Eid(10));
	assert_eq!(exchange.host_tid, TerminusId(2));
	assert_eq!(exchange.bmc_tid, TerminusId(7));
	assert_eq!(exchange.host_range, HandleRange::new(0x10000, 0x1FFFF));
	assert_eq!(exchange.inventory_root, "/inv");
	assert_eq!(
		exchange.container_fixups,
		vec![ContainerFixup { effecter_id: 12, entity_type: 120, entity_instance: 1 }]
	);
	assert!(!config.exchange.fetch_on_start);

	let requester = config.requester_config();
	assert_eq!(requester.response_timeout, Duration::from_millis(500));
	assert_eq!(requester.retries, 0);

	assert_eq!(config.transport.socket, PathBuf::from("/tmp/bridge.sock"));
	assert_eq!(config.reconnect_interval(), Duration::from_millis(250));
	assert_eq!(config.topology.len(), 2);
	assert_eq!(config.topology[1].parent(), Some(Entity::new(11521, 1, 0)));
	assert_eq!(config.entity_names().unwrap().name(45), "enclosure");
}

#[test]
fn overlapping_ranges_are_rejected() {
	let dir = tempfile::tempdir().unwrap();
	let text = "[exchange]\nlocal_range = { start = 1, end = 100 }\nhost_range = { start = 100, end = 200 }\n";
	let err = Config::load(&write(dir.path(), text)).unwrap_err();
	assert!(matches!(err, ConfigError::RangesOverlap { .. }), "{err}");
}

#[test]
fn non_numeric_entity_name_key_is_rejected() {
	let dir = tempfile::tempdir().unwrap();
	let err = Config::load(&write(dir.path(), "[entity_names]\nfan = \"blower\"\n")).unwrap_err();
	assert!(matches!(err, ConfigError::EntityType(ref key) if key == "fan"), "{err}");
}

#[test]
fn unknown_fields_fail_to_parse() {
	let dir = tempfile::tempdir().unwrap();
	let err = Config::load(&write(dir.path(), "[host]\neid = 9\nterminus_handle = 1\n")).unwrap_err();
	assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
}

#[test]
fn missing_file_reports_path() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("absent.toml");
	let err = Config::load(&path).unwrap_err();
	assert!(matches!(err, ConfigError::Read { path: ref p, .. } if *p == path), "{err}");
}

#[test]
fn logical_seed_uses_logical_association() {
	let seed: TopologySeed = toml::from_str("entity = [29, 1, 2]\nparent = [45, 1, 1]\nlogical = true\n").unwrap();
	assert_eq!(seed.association_type(), EntityAssociationPdr::LOGICAL);
	assert_eq!(seed.entity(), Entity::new(29, 1, 2));
}
