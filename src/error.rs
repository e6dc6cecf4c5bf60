use thiserror::Error;

/// Errors raised while setting up or running a transformation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Error loading lua config: {0}")]
    ScriptLoad(mlua::Error),

    #[error("ott.{0} must be a function.")]
    NotCallable(&'static str),

    #[error("Global 'ott' must be a table.")]
    MissingNamespace,

    #[error("Failed to execute Lua function '{name}': {source}")]
    ScriptCall {
        name: &'static str,
        #[source]
        source: mlua::Error,
    },

    #[error("Keys and values in tags must be strings!")]
    InvalidTagType,

    #[error("Processing functions should return true, false, or tags table")]
    UnexpectedReturn,

    #[error("Unknown index type '{0}'. Use --show-index-types or -I to get a list.")]
    UnknownIndexType(String),

    #[error("Unknown geometry processing '{0}'. Use 'none' or 'bbox'.")]
    UnknownGeomProc(String),

    #[error("Unknown mode for -u, --untagged: '{0}'. Use 'drop', 'copy', or 'process'.")]
    UnknownUntaggedMode(String),

    #[error("Cannot add to the {0} index after it was closed for queries (input must be ordered nodes, ways, relations)")]
    IndexClosed(&'static str),

    #[error("Unsupported input format for '{0}'. Use .pbf, .json, .jsonl or .ndjson")]
    UnknownInputFormat(String),

    #[error("Output file '{0}' already exists. Use --overwrite to replace it.")]
    OutputExists(String),

    #[error("Invalid JSON on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("PBF error: {0}")]
    Pbf(#[from] osmpbf::Error),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] lmdb::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output thread terminated: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, Error>;
