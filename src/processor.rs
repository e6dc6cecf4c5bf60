use crate::config::{GeomProc, UntaggedMode};
use crate::error::Result;
use crate::geometry::BoundingBox;
use crate::index_storage::IndexType;
use crate::osm::{ElementKind, OsmElement, Tags};
use crate::script::{Decision, ScriptBinding};
use crate::spatial_index::SpatialIndex;

/// Longest tag key or value (in bytes) that is written out.
pub const MAX_TAG_LENGTH: usize = 256 * 4;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
    /// Script returned `true`.
    pub kept: u64,
    /// Script returned `false`.
    pub dropped: u64,
    /// Script returned a tags table.
    pub rebuilt: u64,
    /// Not handed to the script and copied to the output.
    pub copied: u64,
    /// Not handed to the script and left out.
    pub skipped: u64,
    /// Tags left out of rebuilt features because they were too long.
    pub oversized_tags: u64,
    /// Node/way references that had no entry in the spatial index.
    pub missing_refs: u64,
}

impl ProcessStats {
    pub fn features_read(&self) -> u64 {
        self.nodes + self.ways + self.relations
    }

    pub fn features_written(&self) -> u64 {
        self.kept + self.rebuilt + self.copied
    }
}

/// Runs every feature through the script and collects what comes out.
pub struct Processor {
    script: ScriptBinding,
    index: Option<SpatialIndex>,
    untagged: UntaggedMode,
    stats: ProcessStats,
}

impl Processor {
    pub fn new(
        script: ScriptBinding,
        geom_proc: GeomProc,
        untagged: UntaggedMode,
        index_type: &IndexType,
    ) -> Result<Self> {
        let index = match geom_proc {
            GeomProc::None => None,
            GeomProc::BBox => Some(SpatialIndex::new(index_type)?),
        };

        Ok(Processor {
            script,
            index,
            untagged,
            stats: ProcessStats::default(),
        })
    }

    /// Process one input batch, returning the batch to commit to the output.
    pub fn process_batch(&mut self, batch: Vec<OsmElement>) -> Result<Vec<OsmElement>> {
        let mut out = Vec::with_capacity(batch.len());
        for element in batch {
            self.process(element, &mut out)?;
        }
        Ok(out)
    }

    /// Run a single feature through the pipeline, appending whatever it
    /// produces to `out`.
    pub fn process(&mut self, element: OsmElement, out: &mut Vec<OsmElement>) -> Result<()> {
        let kind = element.kind();
        match kind {
            ElementKind::Node => self.stats.nodes += 1,
            ElementKind::Way => self.stats.ways += 1,
            ElementKind::Relation => self.stats.relations += 1,
        }

        let eligible = self.script.callback(kind).is_some()
            && (!element.tags().is_empty() || self.untagged == UntaggedMode::Process);

        let bbox = self.derive_bbox(&element, eligible)?;

        // Features that bypass the script are only passed on in copy mode.
        let Some(callback) = self.script.callback(kind).filter(|_| eligible) else {
            if self.untagged == UntaggedMode::Copy {
                self.stats.copied += 1;
                out.push(element);
            } else {
                self.stats.skipped += 1;
            }
            return Ok(());
        };

        match self.script.call(callback, &element, &bbox)? {
            Decision::Keep => {
                self.stats.kept += 1;
                out.push(element);
            }
            Decision::Drop => {
                self.stats.dropped += 1;
            }
            Decision::Replace(tags) => {
                self.stats.rebuilt += 1;
                let tags = self.rebuild_tags(element.id(), tags);
                out.push(element.with_tags(tags));
            }
        }

        Ok(())
    }

    /// Feed the spatial index and work out the feature's box. Nodes and ways
    /// are recorded whether or not they reach the script; a relation's box is
    /// only resolved when it will be used.
    fn derive_bbox(&mut self, element: &OsmElement, eligible: bool) -> Result<BoundingBox> {
        let Some(index) = self.index.as_mut() else {
            return Ok(BoundingBox::invalid());
        };

        let bbox = match element {
            OsmElement::Node(node) => index.add_node(node.id, node.location())?,
            OsmElement::Way(way) => index.add_way(way)?,
            OsmElement::Relation(relation) if eligible => index.relation_bbox(relation)?,
            OsmElement::Relation(_) => BoundingBox::invalid(),
        };
        self.stats.missing_refs = index.missing_refs();
        Ok(bbox)
    }

    /// Sort the script's tags by key and leave out entries that are too long
    /// to be stored.
    fn rebuild_tags(&mut self, id: i64, mut tags: Tags) -> Tags {
        tags.sort();
        tags.retain(|(key, value)| {
            if key.len() > MAX_TAG_LENGTH || value.len() > MAX_TAG_LENGTH {
                log::warn!(
                    "Length of tag key or value exceeded on object {}. Ignoring tag '{}'...",
                    id,
                    truncate(key, 32)
                );
                self.stats.oversized_tags += 1;
                false
            } else {
                true
            }
        });
        tags
    }

    pub fn stats(&self) -> &ProcessStats {
        &self.stats
    }

    pub fn script(&self) -> &ScriptBinding {
        &self.script
    }

    /// Bytes used by the node and way stores, if geometry is enabled.
    pub fn index_memory_used(&self) -> Option<(usize, usize)> {
        self.index.as_ref().map(SpatialIndex::memory_used)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((pos, _)) => &text[..pos],
        None => text,
    }
}
