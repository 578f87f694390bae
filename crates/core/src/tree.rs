//! Entity topology tree.
//!
//! Nodes live in a flat arena indexed by [`NodeId`]. Parent and child links
//! are ids, not references. Removed slots are left empty and their ids are
//! never handed out again, so an id held across a merge either still names
//! the same node or resolves to nothing.

use pdrx_proto::Entity;
use smallvec::SmallVec;

use crate::inventory::EntityNames;
use crate::repo::Origin;

/// Stable index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// How strictly [`EntityTree::find`] matches entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
	/// Match entity type and instance number, ignoring the container id.
	Relaxed,
	/// Match all three fields.
	Exact,
}

/// Result of [`EntityTree::attach_child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
	/// A new node was created.
	Created(NodeId),
	/// The entity was already a child of that parent.
	Existing(NodeId),
}

impl Attach {
	/// Node the entity lives in.
	pub fn id(self) -> NodeId {
		match self {
			Self::Created(id) | Self::Existing(id) => id,
		}
	}
}

/// Tree failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
	/// The node id does not name a live node.
	#[error("unknown node {0:?}")]
	UnknownNode(NodeId),
	/// The entity already lives under a different parent.
	#[error("entity {entity:?} already attached under {parent:?}")]
	AttachedElsewhere {
		/// Entity that was being attached.
		entity: Entity,
		/// Its current parent, `None` for a root.
		parent: Option<NodeId>,
	},
}

#[derive(Debug, Clone)]
struct Node {
	entity: Entity,
	origin: Origin,
	parent: Option<NodeId>,
	children: SmallVec<[NodeId; 4]>,
}

/// Entity containment tree.
#[derive(Debug, Clone, Default)]
pub struct EntityTree {
	nodes: Vec<Option<Node>>,
	live: usize,
}

impl EntityTree {
	/// Creates an empty tree.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of live nodes.
	pub fn len(&self) -> usize {
		self.live
	}

	/// Returns true when the tree has no nodes.
	pub fn is_empty(&self) -> bool {
		self.live == 0
	}

	fn node(&self, id: NodeId) -> Option<&Node> {
		self.nodes.get(id.0 as usize)?.as_ref()
	}

	fn push(&mut self, node: Node) -> NodeId {
		let id = NodeId(self.nodes.len() as u32);
		self.nodes.push(Some(node));
		self.live += 1;
		id
	}

	/// Entity stored at `id`.
	pub fn entity(&self, id: NodeId) -> Option<Entity> {
		self.node(id).map(|n| n.entity)
	}

	/// Producer of the node at `id`.
	pub fn origin(&self, id: NodeId) -> Option<Origin> {
		self.node(id).map(|n| n.origin)
	}

	/// Parent of `id`, `None` for roots and unknown ids.
	pub fn parent(&self, id: NodeId) -> Option<NodeId> {
		self.node(id)?.parent
	}

	/// Children of `id` in attach order.
	pub fn children(&self, id: NodeId) -> &[NodeId] {
		self.node(id).map_or(&[], |n| n.children.as_slice())
	}

	/// Live node ids in creation order.
	pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.nodes.iter().enumerate().filter(|(_, n)| n.is_some()).map(|(i, _)| NodeId(i as u32))
	}

	/// Adds a root node, or returns the existing root holding `entity`.
	pub fn add_root(&mut self, entity: Entity, origin: Origin) -> Attach {
		if let Some(id) = self.ids().find(|id| self.parent(*id).is_none() && self.entity(*id) == Some(entity)) {
			return Attach::Existing(id);
		}
		Attach::Created(self.push(Node { entity, origin, parent: None, children: SmallVec::new() }))
	}

	/// First node, in creation order, matching `entity` under `locality`.
	pub fn find(&self, entity: &Entity, locality: Locality) -> Option<NodeId> {
		self.ids().find(|id| {
			self.entity(*id).is_some_and(|e| match locality {
				Locality::Relaxed => e.entity_type == entity.entity_type && e.instance_number == entity.instance_number,
				Locality::Exact => e == *entity,
			})
		})
	}

	/// Attaches `entity` under `parent`.
	///
	/// Attaching an entity that is already a child of `parent` is a no-op.
	/// An entity that lives anywhere else in the tree is rejected, so no
	/// entity is ever duplicated and no node gains a second parent.
	pub fn attach_child(&mut self, parent: NodeId, entity: Entity, origin: Origin) -> Result<Attach, TreeError> {
		let Some(parent_node) = self.node(parent) else {
			return Err(TreeError::UnknownNode(parent));
		};
		if let Some(existing) = parent_node.children.iter().find(|c| self.entity(**c) == Some(entity)) {
			return Ok(Attach::Existing(*existing));
		}
		if let Some(elsewhere) = self.find(&entity, Locality::Exact) {
			return Err(TreeError::AttachedElsewhere { entity, parent: self.parent(elsewhere) });
		}
		let id = self.push(Node { entity, origin, parent: Some(parent), children: SmallVec::new() });
		if let Some(Some(parent_node)) = self.nodes.get_mut(parent.0 as usize) {
			parent_node.children.push(id);
		}
		Ok(Attach::Created(id))
	}

	/// Removes `id` and its subtree. Returns the removed entities, parents
	/// before children.
	pub fn detach(&mut self, id: NodeId) -> Vec<Entity> {
		let Some(parent) = self.node(id).map(|n| n.parent) else {
			return Vec::new();
		};
		if let Some(parent) = parent
			&& let Some(Some(parent_node)) = self.nodes.get_mut(parent.0 as usize)
		{
			parent_node.children.retain(|c| *c != id);
		}

		let mut removed = Vec::new();
		let mut stack = vec![id];
		while let Some(next) = stack.pop() {
			let Some(node) = self.nodes.get_mut(next.0 as usize).and_then(Option::take) else {
				continue;
			};
			self.live -= 1;
			removed.push(node.entity);
			stack.extend(node.children.iter().rev().copied());
		}
		removed
	}

	/// Inventory object path of `id`: `root` followed by one `{name}{instance}`
	/// segment per ancestor, outermost first.
	pub fn object_path(&self, id: NodeId, names: &EntityNames, root: &str) -> Option<String> {
		let mut segments = Vec::new();
		let mut cursor = Some(id);
		while let Some(current) = cursor {
			let node = self.node(current)?;
			segments.push(format!("{}{}", names.name(node.entity.entity_type), node.entity.instance_number));
			cursor = node.parent;
		}
		let mut path = root.trim_end_matches('/').to_string();
		for segment in segments.iter().rev() {
			path.push('/');
			path.push_str(segment);
		}
		Some(path)
	}
}
