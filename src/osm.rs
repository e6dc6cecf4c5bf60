use serde::{Deserialize, Serialize};

use crate::geometry::Location;

/// Ordered list of `(key, value)` pairs. Keys are unique within a feature.
pub type Tags = Vec<(String, String)>;

/// Attribution carried through unchanged by every transformation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribution {
    pub version: i32,
    pub changeset: i64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub uid: i32,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsmNode {
    pub id: i64,
    #[serde(flatten)]
    pub info: Attribution,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, with = "tag_list")]
    pub tags: Tags,
}

impl OsmNode {
    pub fn location(&self) -> Location {
        Location::new(self.lon, self.lat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsmWay {
    pub id: i64,
    #[serde(flatten)]
    pub info: Attribution,
    #[serde(rename = "nodes", default)]
    pub node_refs: Vec<i64>,
    #[serde(default, with = "tag_list")]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsmRelationMember {
    #[serde(rename = "type")]
    pub member_type: ElementKind,
    #[serde(rename = "ref")]
    pub member_id: i64,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsmRelation {
    pub id: i64,
    #[serde(flatten)]
    pub info: Attribution,
    #[serde(default)]
    pub members: Vec<OsmRelationMember>,
    #[serde(default, with = "tag_list")]
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OsmElement {
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
}

impl OsmElement {
    pub fn kind(&self) -> ElementKind {
        match self {
            OsmElement::Node(_) => ElementKind::Node,
            OsmElement::Way(_) => ElementKind::Way,
            OsmElement::Relation(_) => ElementKind::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            OsmElement::Node(node) => node.id,
            OsmElement::Way(way) => way.id,
            OsmElement::Relation(relation) => relation.id,
        }
    }

    pub fn info(&self) -> &Attribution {
        match self {
            OsmElement::Node(node) => &node.info,
            OsmElement::Way(way) => &way.info,
            OsmElement::Relation(relation) => &relation.info,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            OsmElement::Node(node) => &node.tags,
            OsmElement::Way(way) => &way.tags,
            OsmElement::Relation(relation) => &relation.tags,
        }
    }

    /// Replace the tag list, keeping id, attribution and payload as they are.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        match &mut self {
            OsmElement::Node(node) => node.tags = tags,
            OsmElement::Way(way) => way.tags = tags,
            OsmElement::Relation(relation) => relation.tags = tags,
        }
        self
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Serializes [`Tags`] as a JSON object, keeping the list order in both
/// directions.
mod tag_list {
    use std::fmt;

    use serde::de::{Error, MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::Tags;

    pub fn serialize<S: Serializer>(tags: &Tags, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(tags.len()))?;
        for (key, value) in tags {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Tags, D::Error> {
        struct TagVisitor;

        impl<'de> Visitor<'de> for TagVisitor {
            type Value = Tags;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of string keys and string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Tags, A::Error> {
                let mut tags = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    if tags.iter().any(|(k, _): &(String, String)| *k == key) {
                        return Err(A::Error::custom(format!("duplicate tag key '{}'", key)));
                    }
                    tags.push((key, value));
                }
                Ok(tags)
            }
        }

        deserializer.deserialize_map(TagVisitor)
    }
}
