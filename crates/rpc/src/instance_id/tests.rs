use std::collections::HashSet;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

const HOST: TerminusId = TerminusId(1);

#[test]
fn allocation_is_round_robin() {
	let db = InstanceIdDb::new();
	let a = db.allocate(HOST).unwrap();
	let b = db.allocate(HOST).unwrap();
	assert_eq!((a, b), (InstanceId(0), InstanceId(1)));

	db.release(HOST, a).unwrap();
	// released ids are only revisited after the scan wraps
	assert_eq!(db.allocate(HOST).unwrap(), InstanceId(2));
}

#[test]
fn exhaustion_reports_terminus() {
	let db = InstanceIdDb::new();
	for _ in 0..InstanceId::COUNT {
		db.allocate(HOST).unwrap();
	}
	assert_eq!(db.allocate(HOST), Err(InstanceIdError::Exhausted(HOST)));
	assert_eq!(db.in_use(HOST), 32);

	db.release(HOST, InstanceId(17)).unwrap();
	assert_eq!(db.allocate(HOST).unwrap(), InstanceId(17));
}

#[test]
fn pools_are_per_terminus() {
	let db = InstanceIdDb::new();
	for _ in 0..InstanceId::COUNT {
		db.allocate(HOST).unwrap();
	}
	assert_eq!(db.allocate(TerminusId(2)).unwrap(), InstanceId(0));
	assert_eq!(db.in_use(TerminusId(3)), 0);
}

#[test]
fn releasing_a_free_or_out_of_range_id_is_an_error() {
	let db = InstanceIdDb::new();
	assert_eq!(db.release(HOST, InstanceId(3)), Err(InstanceIdError::InvalidId { tid: HOST, id: InstanceId(3) }));
	assert_eq!(db.release(HOST, InstanceId(40)), Err(InstanceIdError::InvalidId { tid: HOST, id: InstanceId(40) }));

	let id = db.allocate(HOST).unwrap();
	db.release(HOST, id).unwrap();
	assert!(db.release(HOST, id).is_err());
}

#[derive(Debug, Clone)]
enum Op {
	Allocate,
	Release(u8),
}

fn op() -> impl Strategy<Value = Op> {
	prop_oneof![3 => Just(Op::Allocate), 2 => (0u8..40).prop_map(Op::Release)]
}

proptest! {
	#[test]
	fn allocator_matches_model(ops in prop::collection::vec(op(), 1..200)) {
		let db = InstanceIdDb::new();
		let mut model: HashSet<u8> = HashSet::new();
		for op in ops {
			match op {
				Op::Allocate => match db.allocate(HOST) {
					Ok(id) => {
						prop_assert!(id.is_valid());
						prop_assert!(model.insert(id.0), "allocated in-use id {}", id.0);
					}
					Err(InstanceIdError::Exhausted(_)) => prop_assert_eq!(model.len(), 32),
					Err(e) => prop_assert!(false, "unexpected {e}"),
				},
				Op::Release(raw) => {
					let result = db.release(HOST, InstanceId(raw));
					prop_assert_eq!(result.is_ok(), model.remove(&raw));
				}
			}
			prop_assert_eq!(db.in_use(HOST) as usize, model.len());
		}
	}
}
