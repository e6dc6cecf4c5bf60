use log::info;
use std::path::PathBuf;

use crate::config::{GeomProc, UntaggedMode};
use crate::error::Result;
use crate::index_storage::IndexType;
use crate::processor::{ProcessStats, Processor};
use crate::reader::{InputFormat, read_batches};
use crate::script::ScriptBinding;
use crate::writer::BatchWriter;

const MBYTES: usize = 1024 * 1024;

/// Everything needed for one run.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub input: PathBuf,
    /// Standard output if not set.
    pub output: Option<PathBuf>,
    pub script: PathBuf,
    pub geom_proc: GeomProc,
    pub untagged: UntaggedMode,
    pub index_type: IndexType,
    pub overwrite: bool,
}

impl TransformOptions {
    pub fn new(input: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        TransformOptions {
            input: input.into(),
            output: None,
            script: script.into(),
            geom_proc: GeomProc::default(),
            untagged: UntaggedMode::default(),
            index_type: IndexType::default(),
            overwrite: false,
        }
    }
}

/// Stream the input through the script into the output.
///
/// The script is loaded and its callbacks resolved before anything is read,
/// so configuration errors never leave a partial output behind.
pub fn run(options: &TransformOptions) -> Result<ProcessStats> {
    info!("osm-tags-transform {} started", env!("CARGO_PKG_VERSION"));
    match options.geom_proc {
        GeomProc::None => info!("No geometry processing. bbox will not be available"),
        GeomProc::BBox => {
            info!("Geometry processing enabled. bbox will be available");
            info!("Using index type '{}'", options.index_type.name());
        }
    }

    let script = ScriptBinding::load(&options.script)?;
    info!(
        "Loaded '{}' with callbacks: {:?}",
        options.script.display(),
        script.bound_names()
    );

    let format = InputFormat::detect(&options.input)?;
    let mut processor = Processor::new(
        script,
        options.geom_proc,
        options.untagged,
        &options.index_type,
    )?;

    let mut writer = BatchWriter::create(options.output.as_deref(), options.overwrite)?;
    match &options.output {
        Some(path) => info!("Writing into '{}'.", path.display()),
        None => info!("Writing to standard output."),
    }

    info!("Start processing '{}'...", options.input.display());
    let mut batch_count = 0usize;
    read_batches(&options.input, format, |batch| {
        let out = processor.process_batch(batch)?;
        writer.write_batch(out)?;

        batch_count += 1;
        if batch_count % 1000 == 0 {
            info!(
                "Processed {} batches, {} features",
                batch_count,
                processor.stats().features_read()
            );
        }
        Ok(())
    })?;

    let written = writer.finish()?;
    info!("Done processing. {} features written.", written);

    report(&processor);
    Ok(processor.stats().clone())
}

fn report(processor: &Processor) {
    let stats = processor.stats();
    info!(
        "Read {} nodes, {} ways, {} relations",
        stats.nodes, stats.ways, stats.relations
    );
    info!(
        "Script kept {}, dropped {}, rebuilt {}; {} copied and {} skipped without calling the script",
        stats.kept, stats.dropped, stats.rebuilt, stats.copied, stats.skipped
    );
    if stats.oversized_tags > 0 {
        info!("{} oversized tags were left out", stats.oversized_tags);
    }

    if let Some((nodes, ways)) = processor.index_memory_used() {
        info!("Memory used for node locations: {}MBytes", nodes / MBYTES);
        info!("Memory used for way locations: {}MBytes", ways / MBYTES);
        info!(
            "{} node/way references could not be resolved",
            stats.missing_refs
        );
    }

    if let Some((current, peak)) = memory_usage_mb() {
        info!("Overall memory usage: peak={}MByte current={}MByte", peak, current);
    }
}

/// Current and peak resident memory in MB, where the platform tells us.
fn memory_usage_mb() -> Option<(u64, u64)> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/self/status").ok()?;
        let field = |name: &str| {
            contents
                .lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
                .map(|kb| kb / 1024)
        };
        Some((field("VmRSS:")?, field("VmHWM:")?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
