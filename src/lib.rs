pub mod config;
pub mod error;
pub mod geometry;
pub mod index_storage;
pub mod osm;
pub mod processor;
pub mod reader;
pub mod script;
pub mod spatial_index;
pub mod transform;
pub mod writer;

pub use config::{GeomProc, UntaggedMode};
pub use error::{Error, Result};
pub use geometry::{BoundingBox, Location};
pub use index_storage::{INDEX_TYPES, IndexType};
pub use osm::*;
pub use processor::{ProcessStats, Processor};
pub use script::{Decision, ScriptBinding};
pub use transform::{TransformOptions, run};
