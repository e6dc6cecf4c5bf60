use osmpbf::{BlobDecode, BlobReader, Element, PrimitiveBlock};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::osm::{
    Attribution, ElementKind, OsmElement, OsmNode, OsmRelation, OsmRelationMember, OsmWay,
};

/// Features per batch when reading JSON lines.
pub const JSON_BATCH_SIZE: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Pbf,
    JsonLines,
}

impl InputFormat {
    /// Pick the format from the file extension.
    pub fn detect(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("pbf") => Ok(InputFormat::Pbf),
            Some("json" | "jsonl" | "ndjson") => Ok(InputFormat::JsonLines),
            _ => Err(Error::UnknownInputFormat(path.display().to_string())),
        }
    }
}

/// Read `path` front to back, calling `handle` once per input batch in file
/// order.
pub fn read_batches<F>(path: &Path, format: InputFormat, handle: F) -> Result<()>
where
    F: FnMut(Vec<OsmElement>) -> Result<()>,
{
    match format {
        InputFormat::Pbf => read_pbf(path, handle),
        InputFormat::JsonLines => read_json_lines(BufReader::new(File::open(path)?), handle),
    }
}

/// One batch per PBF data blob. Blobs are decoded a window at a time on the
/// rayon pool and handed on in file order.
fn read_pbf<F>(path: &Path, mut handle: F) -> Result<()>
where
    F: FnMut(Vec<OsmElement>) -> Result<()>,
{
    let mut blobs = BlobReader::from_path(path)?;
    let window = num_cpus::get().max(1) * 2;

    loop {
        let chunk = blobs.by_ref().take(window).collect::<Vec<_>>();
        if chunk.is_empty() {
            return Ok(());
        }

        let decoded: Vec<Option<Vec<OsmElement>>> = chunk
            .into_par_iter()
            .map(|blob| -> std::result::Result<Option<Vec<OsmElement>>, osmpbf::Error> {
                match blob?.decode()? {
                    BlobDecode::OsmData(block) => Ok(Some(convert_block(&block))),
                    // Header and unknown blobs carry no features.
                    BlobDecode::OsmHeader(_) | BlobDecode::Unknown(_) => Ok(None),
                }
            })
            .collect::<std::result::Result<_, osmpbf::Error>>()?;

        for batch in decoded.into_iter().flatten() {
            handle(batch)?;
        }
    }
}

fn convert_block(block: &PrimitiveBlock) -> Vec<OsmElement> {
    block.elements().map(convert_element).collect()
}

fn collect_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<(String, String)> {
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn attribution(info: &osmpbf::Info) -> Attribution {
    Attribution {
        version: info.version().unwrap_or(0),
        changeset: info.changeset().unwrap_or(0),
        timestamp: info.milli_timestamp().unwrap_or(0),
        uid: info.uid().unwrap_or(0),
        user: info
            .user()
            .and_then(|user| user.ok())
            .unwrap_or_default()
            .to_string(),
    }
}

fn convert_element(element: Element) -> OsmElement {
    match element {
        Element::Node(node) => OsmElement::Node(OsmNode {
            id: node.id(),
            info: attribution(&node.info()),
            lat: node.lat(),
            lon: node.lon(),
            tags: collect_tags(node.tags()),
        }),
        Element::DenseNode(dense_node) => {
            let info = dense_node
                .info()
                .map(|info| Attribution {
                    version: info.version(),
                    changeset: info.changeset(),
                    timestamp: info.milli_timestamp(),
                    uid: info.uid(),
                    user: info.user().unwrap_or_default().to_string(),
                })
                .unwrap_or_default();
            OsmElement::Node(OsmNode {
                id: dense_node.id(),
                info,
                lat: dense_node.lat(),
                lon: dense_node.lon(),
                tags: collect_tags(dense_node.tags()),
            })
        }
        Element::Way(way) => OsmElement::Way(OsmWay {
            id: way.id(),
            info: attribution(&way.info()),
            node_refs: way.refs().collect(),
            tags: collect_tags(way.tags()),
        }),
        Element::Relation(relation) => {
            let members = relation
                .members()
                .map(|member| OsmRelationMember {
                    member_type: match member.member_type {
                        osmpbf::RelMemberType::Node => ElementKind::Node,
                        osmpbf::RelMemberType::Way => ElementKind::Way,
                        osmpbf::RelMemberType::Relation => ElementKind::Relation,
                    },
                    member_id: member.member_id,
                    role: member.role().unwrap_or("").to_string(),
                })
                .collect();

            OsmElement::Relation(OsmRelation {
                id: relation.id(),
                info: attribution(&relation.info()),
                members,
                tags: collect_tags(relation.tags()),
            })
        }
    }
}

/// One feature per line, as written by [`crate::writer::BatchWriter`].
pub fn read_json_lines<R, F>(input: R, mut handle: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(Vec<OsmElement>) -> Result<()>,
{
    let mut batch = Vec::with_capacity(JSON_BATCH_SIZE);

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let element = serde_json::from_str(&line).map_err(|source| Error::Json {
            line: index + 1,
            source,
        })?;
        batch.push(element);

        if batch.len() == JSON_BATCH_SIZE {
            handle(std::mem::replace(
                &mut batch,
                Vec::with_capacity(JSON_BATCH_SIZE),
            ))?;
        }
    }

    if !batch.is_empty() {
        handle(batch)?;
    }
    Ok(())
}
