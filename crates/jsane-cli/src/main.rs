use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use jsane_core::{init_tracing, instrument, JsaneConfig, LinkageMode};

fn cli() -> Command {
    Command::new("jsane")
        .version(jsane_core::VERSION)
        .about("Instrument JavaScript sources with JSane runtime checks")
        .arg(
            Arg::new("input")
                .value_name("FILE")
                .help("JavaScript file to instrument")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the instrumented source here instead of stdout"),
        )
        .arg(
            Arg::new("hook-name")
                .long("hook-name")
                .value_name("NAME")
                .help("Variable holding the runtime hook object"),
        )
        .arg(
            Arg::new("linkage")
                .long("linkage")
                .value_name("MODE")
                .value_parser(["embed", "require", "none"])
                .help("How the output obtains the runtime"),
        )
        .arg(
            Arg::new("module")
                .long("module")
                .value_name("NAME")
                .help("Module name used with require linkage"),
        )
        .arg(
            Arg::new("runtime")
                .long("runtime")
                .value_name("FILE")
                .help("Runtime library source embedded with embed linkage"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
}

/// Configuration file settings with command line flags applied on top.
fn configuration(matches: &ArgMatches) -> Result<JsaneConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => JsaneConfig::load(Path::new(path))?,
        None => JsaneConfig::default(),
    };

    if let Some(name) = matches.get_one::<String>("hook-name") {
        config.instrument.hook_variable_name = name.clone();
    }
    if let Some(mode) = matches.get_one::<String>("linkage") {
        config.instrument.linkage = match mode.as_str() {
            "embed" => LinkageMode::Embed,
            "require" => LinkageMode::Require,
            "none" => LinkageMode::AssumePreexisting,
            other => bail!("unknown linkage mode '{other}'"),
        };
    }
    if let Some(module) = matches.get_one::<String>("module") {
        config.instrument.module_name = module.clone();
    }
    if let Some(runtime) = matches.get_one::<String>("runtime") {
        config.runtime_path = Some(PathBuf::from(runtime));
    }
    Ok(config)
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    if matches.get_flag("debug") {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("jsane_core=debug,jsane=debug"))
            .with_writer(std::io::stderr)
            .init();
    } else {
        init_tracing();
    }

    let config = configuration(&matches)?;
    let options = config.resolved_instrument_options()?;

    let input = matches
        .get_one::<String>("input")
        .context("an input file is required")?;
    let source = fs::read_to_string(input).with_context(|| format!("cannot read {input}"))?;

    let output = instrument(&source, input, &options)?;
    for diagnostic in &output.diagnostics {
        eprintln!("warning: {diagnostic}");
    }
    tracing::debug!(input = %input, diagnostics = output.diagnostics.len(), "instrumentation finished");

    match matches.get_one::<String>("output") {
        Some(path) => fs::write(path, &output.code).with_context(|| format!("cannot write {path}"))?,
        None => print!("{}", output.code),
    }
    Ok(())
}
