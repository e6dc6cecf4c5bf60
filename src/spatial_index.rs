//! Node locations and way bounding boxes collected while the input streams
//! past.
//!
//! Each store starts out [`OpenStore`] (insert only) and becomes a
//! [`ClosedStore`] (lookup only) the first time something asks it a question.
//! That transition consumes the open store, so there is no way back.

use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, Location, resolve_bbox};
use crate::index_storage::{IdMap, IndexType, IndexValue};
use crate::osm::{ElementKind, OsmRelation, OsmWay};

pub struct OpenStore<V> {
    map: Box<dyn IdMap<V>>,
}

impl<V: IndexValue> OpenStore<V> {
    pub fn new(map: Box<dyn IdMap<V>>) -> Self {
        OpenStore { map }
    }

    pub fn set(&mut self, id: i64, value: V) -> Result<()> {
        self.map.set(id, value)
    }

    /// Finalize the backend for lookups.
    pub fn close(mut self) -> Result<ClosedStore<V>> {
        self.map.finalize()?;
        Ok(ClosedStore { map: self.map })
    }
}

pub struct ClosedStore<V> {
    map: Box<dyn IdMap<V>>,
}

impl<V: IndexValue> ClosedStore<V> {
    pub fn get(&self, id: i64) -> Result<Option<V>> {
        self.map.get(id)
    }
}

enum Phase<V> {
    Open(OpenStore<V>),
    Closed(ClosedStore<V>),
}

/// A store that moves from open to closed exactly once.
pub struct Store<V> {
    name: &'static str,
    // Only `None` while a transition is in progress or after it failed.
    phase: Option<Phase<V>>,
}

impl<V: IndexValue> Store<V> {
    pub fn new(name: &'static str, map: Box<dyn IdMap<V>>) -> Self {
        Store {
            name,
            phase: Some(Phase::Open(OpenStore::new(map))),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Some(Phase::Closed(_)))
    }

    pub fn insert(&mut self, id: i64, value: V) -> Result<()> {
        match &mut self.phase {
            Some(Phase::Open(store)) => store.set(id, value),
            _ => Err(Error::IndexClosed(self.name)),
        }
    }

    /// The query side of the store, closing it first if still open.
    pub fn closed(&mut self) -> Result<&ClosedStore<V>> {
        self.phase = match self.phase.take() {
            Some(Phase::Open(open)) => {
                log::debug!("Closing {} index for queries", self.name);
                Some(Phase::Closed(open.close()?))
            }
            other => other,
        };
        match &self.phase {
            Some(Phase::Closed(store)) => Ok(store),
            _ => Err(Error::IndexClosed(self.name)),
        }
    }

    pub fn memory_used(&self) -> usize {
        match &self.phase {
            Some(Phase::Open(store)) => store.map.memory_used(),
            Some(Phase::Closed(store)) => store.map.memory_used(),
            None => 0,
        }
    }
}

/// Node locations and way boxes, fed in input order.
pub struct SpatialIndex {
    nodes: Store<Location>,
    ways: Store<BoundingBox>,
    missing_refs: u64,
}

impl SpatialIndex {
    /// Node locations live in the selected backend; way boxes are always kept
    /// in memory.
    pub fn new(index_type: &IndexType) -> Result<Self> {
        Ok(SpatialIndex {
            nodes: Store::new("node location", index_type.create_map()?),
            ways: Store::new("way bbox", IndexType::SparseMemArray.create_map()?),
            missing_refs: 0,
        })
    }

    /// Record a node location and return the node's own (point) box.
    pub fn add_node(&mut self, id: i64, location: Location) -> Result<BoundingBox> {
        self.nodes.insert(id, location)?;
        Ok(BoundingBox::from_location(location))
    }

    /// Derive a way's box from the node locations seen so far and record it.
    pub fn add_way(&mut self, way: &OsmWay) -> Result<BoundingBox> {
        let nodes = self.nodes.closed()?;
        let resolved = resolve_bbox(
            way.node_refs.iter().map(|&id| (ElementKind::Node, id)),
            |id| nodes.get(id),
            |_| Ok(None),
        )?;
        self.missing_refs += resolved.missing;

        if resolved.bbox.is_valid() {
            self.ways.insert(way.id, resolved.bbox)?;
        }
        Ok(resolved.bbox)
    }

    /// Box over a relation's node and way members. Nested relations are not
    /// followed.
    pub fn relation_bbox(&mut self, relation: &OsmRelation) -> Result<BoundingBox> {
        let nodes = self.nodes.closed()?;
        let ways = self.ways.closed()?;
        let resolved = resolve_bbox(
            relation
                .members
                .iter()
                .map(|member| (member.member_type, member.member_id)),
            |id| nodes.get(id),
            |id| ways.get(id),
        )?;
        self.missing_refs += resolved.missing;
        Ok(resolved.bbox)
    }

    /// References that could not be resolved so far.
    pub fn missing_refs(&self) -> u64 {
        self.missing_refs
    }

    /// Bytes used by the node and way stores.
    pub fn memory_used(&self) -> (usize, usize) {
        (self.nodes.memory_used(), self.ways.memory_used())
    }
}
