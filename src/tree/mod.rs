//! Node Tree Module
//!
//! Arena-backed tree of typed nodes. Every node except the root has exactly
//! one owner (its parent container) and a field name under that parent.
//! Ownership is strictly tree-shaped: no sharing, no cycles. A node detached
//! from its parent becomes unreachable; its arena slot is not reused.
//!
//! ## Type Constraints
//!
//! A node is type-constrained (no children may be added beneath it) when any
//! ancestor is a CompressedVector, or a non-heterogeneous Vector with more
//! than one child. The check walks parent links on demand; attach points can
//! only change through explicit `set`/`append`, so nothing is cached.

mod node;

use serde::{Deserialize, Serialize};

pub use node::{NodeData, NodeId, NodeKind, Precision};

use crate::error::{Result, VoxError};

/// Arena slot: parent link, field name under the parent, and the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    parent: Option<NodeId>,
    field_name: String,
    data: NodeData,
}

/// The node tree of one ImageFile
///
/// Rooted at a Structure (arena index 0). All node handles (`NodeId`) are
/// indices into this arena and are only meaningful for the tree that issued
/// them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Tree {
    slots: Vec<Slot>,
    root: NodeId,
}

impl Tree {
    /// Empty tree with a root Structure
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![Slot {
                parent: None,
                field_name: String::new(),
                data: NodeData::structure(),
            }],
            root: NodeId(0),
        }
    }

    /// The root Structure of the tree
    pub fn root(&self) -> NodeId {
        self.root
    }

    // -------------------------------------------------------------------------
    // Node Construction
    // -------------------------------------------------------------------------

    pub(crate) fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Slot {
            parent: None,
            field_name: String::new(),
            data,
        });
        id
    }

    /// Create a detached Integer node; `value` must lie in `[minimum, maximum]`
    pub fn alloc_integer(&mut self, value: i64, minimum: i64, maximum: i64) -> Result<NodeId> {
        Ok(self.alloc(NodeData::integer(value, minimum, maximum)?))
    }

    /// Create a detached ScaledInteger node; bounds apply to the raw value
    pub fn alloc_scaled_integer(
        &mut self,
        raw: i64,
        minimum: i64,
        maximum: i64,
        scale: f64,
        offset: f64,
    ) -> Result<NodeId> {
        Ok(self.alloc(NodeData::scaled_integer(raw, minimum, maximum, scale, offset)?))
    }

    /// Create a detached Float node
    pub fn alloc_float(&mut self, value: f64, precision: Precision) -> NodeId {
        self.alloc(NodeData::float(value, precision))
    }

    /// Create a detached String node
    pub fn alloc_string(&mut self, value: impl Into<String>) -> NodeId {
        self.alloc(NodeData::string(value))
    }

    /// Create a detached Structure node
    pub fn alloc_structure(&mut self) -> NodeId {
        self.alloc(NodeData::structure())
    }

    /// Create a detached Vector node
    pub fn alloc_vector(&mut self, allow_hetero: bool) -> NodeId {
        self.alloc(NodeData::vector(allow_hetero))
    }

    /// Create a detached CompressedVector node over `prototype`
    ///
    /// The prototype must be a detached Structure. It becomes owned by the
    /// CompressedVector (so every node beneath it is type-constrained from
    /// here on) and is never part of the reachable tree.
    pub fn alloc_compressed_vector(&mut self, prototype: NodeId) -> Result<NodeId> {
        if self.kind(prototype)? != NodeKind::Structure {
            return Err(VoxError::TypeMismatch(
                "compressed vector prototype must be a Structure".into(),
            ));
        }
        if self.slot(prototype)?.parent.is_some() {
            return Err(VoxError::TypeConstraint(
                "prototype is already attached to another node".into(),
            ));
        }
        let id = self.alloc(NodeData::CompressedVector {
            prototype,
            record_count: 0,
            index_offset: None,
            side_offset: None,
            writing: false,
        });
        let proto = self.slot_mut(prototype)?;
        proto.parent = Some(id);
        proto.field_name = "prototype".to_string();
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots
            .get(id.index())
            .ok_or_else(|| VoxError::UndefinedPath(format!("unknown node id {}", id.0)))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index())
            .ok_or_else(|| VoxError::UndefinedPath(format!("unknown node id {}", id.0)))
    }

    /// Payload of a node
    pub fn data(&self, id: NodeId) -> Result<&NodeData> {
        Ok(&self.slot(id)?.data)
    }

    pub(crate) fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        Ok(&mut self.slot_mut(id)?.data)
    }

    /// Variant discriminant of a node
    pub fn kind(&self, id: NodeId) -> Result<NodeKind> {
        Ok(self.slot(id)?.data.kind())
    }

    /// Parent of a node; `None` for the root and for detached nodes
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.slot(id)?.parent)
    }

    /// Field name of a node under its parent; empty for the root
    pub fn field_name(&self, id: NodeId) -> Result<&str> {
        Ok(&self.slot(id)?.field_name)
    }

    /// Absolute path of a node: field names joined with `/`, root is `/`
    pub fn path_name(&self, id: NodeId) -> Result<String> {
        let mut segments = Vec::new();
        let mut cur = id;
        loop {
            let slot = self.slot(cur)?;
            match slot.parent {
                Some(parent) => {
                    segments.push(slot.field_name.clone());
                    cur = parent;
                }
                None => break,
            }
        }
        if segments.is_empty() {
            return Ok("/".to_string());
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    /// Number of children: named children for a Structure, indexed children
    /// for a Vector, committed records for a CompressedVector, 0 for leaves
    pub fn child_count(&self, id: NodeId) -> Result<u64> {
        Ok(match &self.slot(id)?.data {
            NodeData::Structure { children } => children.len() as u64,
            NodeData::Vector { children, .. } => children.len() as u64,
            NodeData::CompressedVector { record_count, .. } => *record_count,
            _ => 0,
        })
    }

    /// Child of a Structure or Vector by position
    pub fn child(&self, id: NodeId, index: usize) -> Result<NodeId> {
        let child = match &self.slot(id)?.data {
            NodeData::Structure { children } => children.get(index).map(|(_, c)| *c),
            NodeData::Vector { children, .. } => children.get(index).copied(),
            _ => None,
        };
        child.ok_or_else(|| VoxError::OutOfRange {
            requested: index as u64,
            available: self.child_count(id).unwrap_or(0),
        })
    }

    // -------------------------------------------------------------------------
    // Path Resolution
    // -------------------------------------------------------------------------

    /// Resolve a `/`-separated path relative to `base`; a leading `/` makes
    /// the path absolute. Vector children are addressed by decimal index.
    pub fn get(&self, base: NodeId, path: &str) -> Result<NodeId> {
        let mut cur = if path.starts_with('/') { self.root } else { base };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            cur = self.resolve_segment(cur, segment).ok_or_else(|| {
                VoxError::UndefinedPath(format!("{path} (at segment '{segment}')"))
            })?;
        }
        Ok(cur)
    }

    /// Whether a path resolves to a node
    pub fn is_defined(&self, base: NodeId, path: &str) -> bool {
        self.get(base, path).is_ok()
    }

    fn resolve_segment(&self, base: NodeId, segment: &str) -> Option<NodeId> {
        match &self.slot(base).ok()?.data {
            NodeData::Structure { children } => children
                .iter()
                .find(|(name, _)| name == segment)
                .map(|(_, id)| *id),
            NodeData::Vector { children, .. } => {
                let index: usize = segment.parse().ok()?;
                children.get(index).copied()
            }
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Attachment
    // -------------------------------------------------------------------------

    /// Attach `child` to a Structure under `name`
    ///
    /// Fails with `TypeConstraint` if the structure is type-constrained or the
    /// child is already owned, `DuplicateField` if the name is taken.
    pub fn set(&mut self, structure: NodeId, name: &str, child: NodeId) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(VoxError::UndefinedPath(format!(
                "invalid field name '{name}'"
            )));
        }
        if self.kind(structure)? != NodeKind::Structure {
            return Err(VoxError::TypeMismatch(format!(
                "set target {} is not a Structure",
                self.path_name(structure)?
            )));
        }
        if self.is_type_constrained(structure)? {
            return Err(VoxError::TypeConstraint(format!(
                "{} is type-constrained",
                self.path_name(structure)?
            )));
        }
        if self.slot(child)?.parent.is_some() {
            return Err(VoxError::TypeConstraint(
                "node is already attached to a parent".into(),
            ));
        }
        if let NodeData::Structure { children } = &self.slot(structure)?.data {
            if children.iter().any(|(n, _)| n == name) {
                return Err(VoxError::DuplicateField(format!(
                    "{}/{name}",
                    self.path_name(structure)?
                )));
            }
        }

        let slot = self.slot_mut(child)?;
        slot.parent = Some(structure);
        slot.field_name = name.to_string();
        if let NodeData::Structure { children } = &mut self.slot_mut(structure)?.data {
            children.push((name.to_string(), child));
        }
        Ok(())
    }

    /// Attach `child` at a multi-segment path, creating missing intermediate
    /// Structures (the `autoPathCreate` behavior)
    pub fn set_path(&mut self, base: NodeId, path: &str, child: NodeId) -> Result<()> {
        let mut cur = if path.starts_with('/') { self.root } else { base };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (last, intermediate) = segments.split_last().ok_or_else(|| {
            VoxError::UndefinedPath(format!("empty path '{path}'"))
        })?;
        for segment in intermediate {
            cur = match self.resolve_segment(cur, segment) {
                Some(next) => {
                    if self.kind(next)? != NodeKind::Structure {
                        return Err(VoxError::UndefinedPath(format!(
                            "{path}: '{segment}' is not a Structure"
                        )));
                    }
                    next
                }
                None => {
                    let next = self.alloc_structure();
                    self.set(cur, segment, next)?;
                    next
                }
            };
        }
        self.set(cur, last, child)
    }

    /// Append `child` to a Vector
    ///
    /// For a non-heterogeneous Vector every child after the first must share
    /// the first child's shape (kind, and recursively the same field set).
    pub fn append(&mut self, vector: NodeId, child: NodeId) -> Result<()> {
        if self.kind(vector)? != NodeKind::Vector {
            return Err(VoxError::TypeMismatch(format!(
                "append target {} is not a Vector",
                self.path_name(vector)?
            )));
        }
        if self.is_type_constrained(vector)? {
            return Err(VoxError::TypeConstraint(format!(
                "{} is type-constrained",
                self.path_name(vector)?
            )));
        }
        if self.slot(child)?.parent.is_some() {
            return Err(VoxError::TypeConstraint(
                "node is already attached to a parent".into(),
            ));
        }
        if let NodeData::Vector {
            children,
            allow_hetero: false,
        } = &self.slot(vector)?.data
        {
            if let Some(&first) = children.first() {
                if !self.same_shape(first, child)? {
                    return Err(VoxError::TypeConstraint(format!(
                        "child shape differs from first child of {}",
                        self.path_name(vector)?
                    )));
                }
            }
        }

        let index = self.child_count(vector)?;
        let slot = self.slot_mut(child)?;
        slot.parent = Some(vector);
        slot.field_name = index.to_string();
        if let NodeData::Vector { children, .. } = &mut self.slot_mut(vector)?.data {
            children.push(child);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Type Constraints
    // -------------------------------------------------------------------------

    /// Whether children may no longer be added beneath `id`
    ///
    /// True when any ancestor (the node itself excluded) is a
    /// CompressedVector, or a non-heterogeneous Vector with more than one
    /// child.
    pub fn is_type_constrained(&self, id: NodeId) -> Result<bool> {
        let mut cur = self.slot(id)?.parent;
        while let Some(ancestor) = cur {
            match &self.slot(ancestor)?.data {
                NodeData::CompressedVector { .. } => return Ok(true),
                NodeData::Vector {
                    children,
                    allow_hetero: false,
                } if children.len() > 1 => return Ok(true),
                _ => {}
            }
            cur = self.slot(ancestor)?.parent;
        }
        Ok(false)
    }

    /// Shape equality for the non-heterogeneous Vector rule: same kind, and
    /// for Structures the same field set with recursively equal shapes.
    fn same_shape(&self, a: NodeId, b: NodeId) -> Result<bool> {
        let da = &self.slot(a)?.data;
        let db = &self.slot(b)?.data;
        if da.kind() != db.kind() {
            return Ok(false);
        }
        match (da, db) {
            (NodeData::Structure { children: ca }, NodeData::Structure { children: cb }) => {
                if ca.len() != cb.len() {
                    return Ok(false);
                }
                for (name, child_a) in ca {
                    let child_b = match cb.iter().find(|(n, _)| n == name) {
                        Some((_, id)) => *id,
                        None => return Ok(false),
                    };
                    if !self.same_shape(*child_a, child_b)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (
                NodeData::Vector {
                    allow_hetero: ha, ..
                },
                NodeData::Vector {
                    allow_hetero: hb, ..
                },
            ) => Ok(ha == hb),
            _ => Ok(true),
        }
    }

    /// Prototype Structure of a CompressedVector
    pub fn prototype(&self, id: NodeId) -> Result<NodeId> {
        match self.data(id)? {
            NodeData::CompressedVector { prototype, .. } => Ok(*prototype),
            _ => Err(VoxError::TypeMismatch(format!(
                "{} is not a CompressedVector",
                self.path_name(id)?
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // CompressedVector Bookkeeping (codec engine internals)
    // -------------------------------------------------------------------------

    pub(crate) fn cv_parts(&self, id: NodeId) -> Result<(NodeId, u64, Option<u64>, Option<u64>, bool)> {
        match &self.slot(id)?.data {
            NodeData::CompressedVector {
                prototype,
                record_count,
                index_offset,
                side_offset,
                writing,
            } => Ok((*prototype, *record_count, *index_offset, *side_offset, *writing)),
            _ => Err(VoxError::TypeMismatch(format!(
                "{} is not a CompressedVector",
                self.path_name(id)?
            ))),
        }
    }

    pub(crate) fn cv_set_writing(&mut self, id: NodeId, value: bool) -> Result<()> {
        if let NodeData::CompressedVector { writing, .. } = self.data_mut(id)? {
            *writing = value;
            Ok(())
        } else {
            Err(VoxError::TypeMismatch("not a CompressedVector".into()))
        }
    }

    pub(crate) fn cv_commit(
        &mut self,
        id: NodeId,
        record_count: u64,
        index_offset: u64,
        side_offset: Option<u64>,
    ) -> Result<()> {
        if let NodeData::CompressedVector {
            record_count: rc,
            index_offset: io,
            side_offset: so,
            writing,
            ..
        } = self.data_mut(id)?
        {
            *rc = record_count;
            *io = Some(index_offset);
            *so = side_offset;
            *writing = false;
            Ok(())
        } else {
            Err(VoxError::TypeMismatch("not a CompressedVector".into()))
        }
    }
}
