use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};

use osm_tags_transform::{GeomProc, INDEX_TYPES, IndexType, TransformOptions, UntaggedMode};

fn main() -> Result<()> {
    let matches = Command::new("osm-tags-transform")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Transform the tags of OpenStreetMap data with a Lua script")
        .arg(
            Arg::new("input")
                .help("Input file (.osm.pbf, or JSON lines as written by this tool)")
                .required_unless_present("show-index-types")
                .index(1),
        )
        .arg(
            Arg::new("config-file")
                .short('c')
                .long("config-file")
                .value_name("FILE")
                .required_unless_present("show-index-types")
                .help("Lua script defining ott.process_node/way/relation"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output JSON-lines file (stdout if not specified)"),
        )
        .arg(
            Arg::new("overwrite")
                .short('O')
                .long("overwrite")
                .action(ArgAction::SetTrue)
                .help("Allow an existing output file to be replaced"),
        )
        .arg(
            Arg::new("geom-proc")
                .short('g')
                .long("geom-proc")
                .value_name("TYPE")
                .help("Geometry processing: none or bbox")
                .value_parser(["none", "bbox"])
                .default_value("none"),
        )
        .arg(
            Arg::new("index-type")
                .short('i')
                .long("index-type")
                .value_name("TYPE")
                .help("Index type for node locations (used with --geom-proc=bbox)")
                .default_value("sparse_mem_array"),
        )
        .arg(
            Arg::new("show-index-types")
                .short('I')
                .long("show-index-types")
                .action(ArgAction::SetTrue)
                .help("Show available index types and exit"),
        )
        .arg(
            Arg::new("untagged")
                .short('u')
                .long("untagged")
                .value_name("MODE")
                .help("What to do with untagged features: drop, copy or process")
                .value_parser(["drop", "copy", "process"])
                .default_value("copy"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Report progress and a summary on stderr"),
        )
        .get_matches();

    if matches.get_flag("show-index-types") {
        for name in INDEX_TYPES {
            println!("{}", name);
        }
        return Ok(());
    }

    let level = if matches.get_flag("verbose") {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let input_path = matches
        .get_one::<String>("input")
        .context("missing input file")?;
    let config_file = matches
        .get_one::<String>("config-file")
        .context("missing --config-file")?;

    if !Path::new(input_path).exists() {
        anyhow::bail!("Input file does not exist: {}", input_path);
    }

    let options = TransformOptions {
        input: PathBuf::from(input_path),
        output: matches.get_one::<String>("output").map(PathBuf::from),
        script: PathBuf::from(config_file),
        geom_proc: parse_option::<GeomProc>(&matches, "geom-proc")?,
        untagged: parse_option::<UntaggedMode>(&matches, "untagged")?,
        index_type: parse_option::<IndexType>(&matches, "index-type")?,
        overwrite: matches.get_flag("overwrite"),
    };

    osm_tags_transform::run(&options)
        .with_context(|| format!("Failed to process '{}'", input_path))?;

    Ok(())
}

fn parse_option<T>(matches: &clap::ArgMatches, name: &str) -> Result<T>
where
    T: std::str::FromStr<Err = osm_tags_transform::Error>,
{
    let value = matches
        .get_one::<String>(name)
        .with_context(|| format!("missing --{}", name))?;
    Ok(value.parse::<T>()?)
}
