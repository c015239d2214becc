// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Run a synthetic DVS processing pipeline

use anyhow::{anyhow, bail, Context, Error};
use argh::FromArgs;
use evflow::configuration::pipeline;
use evflow::registry::attributes;
use evflow::prelude::*;
use evflow_log::{debug, info, level_filter_to_u8, LevelFilter};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter as TraceLevel;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::SubscriberInitExt as _;

mod config;
mod modules;

/// Interval of the control thread
const CONTROL_INTERVAL: Duration = Duration::from_millis(100);
/// Module id reported as the source of the mid-run reset
const RESET_SOURCE: ModuleId = ModuleId::new(1);

#[derive(FromArgs)]
#[argh(help_triggers("-h", "--help", "help"))]
/// Synthetic DVS pipeline
struct Args {
    #[argh(description = "cycle time in milliseconds")]
    #[argh(option, default = "10")]
    cycle_ms: u64,

    #[argh(description = "number of cycles to run before shutting down")]
    #[argh(option, default = "200")]
    cycles: u64,

    #[argh(description = "log level")]
    #[argh(option, short = 'l')]
    log_level: Option<LevelFilter>,

    #[argh(description = "pipeline configuration as json")]
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(description = "configuration override \"<node> <key> <type> <value>\"")]
    #[argh(option, short = 'o', long = "override")]
    overrides: Vec<String>,

    #[argh(description = "print the configuration and exit")]
    #[argh(switch)]
    dump_config: bool,

    #[argh(description = "print module spans")]
    #[argh(switch)]
    trace: bool,
}

fn main() -> Result<(), Error> {
    let Args {
        cycle_ms,
        cycles,
        log_level,
        config,
        overrides,
        dump_config,
        trace,
    } = argh::from_env();

    evflow_logger::init(log_level.unwrap_or(LevelFilter::Info), true);
    if trace {
        tracing_subscriber::fmt()
            .with_max_level(TraceLevel::TRACE)
            .with_span_events(FmtSpan::CLOSE)
            .finish()
            .try_init()
            .map_err(|e| anyhow!(e))?;
    }

    let root = ConfigNode::root();
    match &config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {path:?}"))?;
            root.import_json_str(&json)
                .with_context(|| format!("invalid configuration {path:?}"))?;
        }
        None => root.import_json_str(config::DEFAULT_CONFIG)?,
    }
    if let Some(level) = log_level {
        seed_log_level(&root, level)?;
    }
    for entry in &overrides {
        apply_override(&root, entry).with_context(|| format!("invalid override {entry:?}"))?;
    }

    if dump_config {
        println!("{}", root.export_json_string()?);
        return Ok(());
    }

    let builder = pipeline::from_config(&root, &config::catalog())?
        .cycle_time(Duration::from_millis(cycle_ms));

    // Modules are created on the mainloop thread and never leave it
    let (handle_sender, handle_receiver) = mpsc::channel();
    let mainloop_thread = thread::Builder::new()
        .name("mainloop".to_owned())
        .spawn(move || match builder.build() {
            Ok(mut mainloop) => {
                let _ = handle_sender.send(Ok(mainloop.handle()));
                mainloop.run();
            }
            Err(e) => {
                let _ = handle_sender.send(Err(e));
            }
        })
        .context("failed to spawn mainloop thread")?;

    let handle = handle_receiver
        .recv()
        .context("mainloop thread exited")?
        .context("failed to build pipeline")?;
    info!("Execution order {:?}", handle.execution_order());

    let signal_handle = handle.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        signal_handle.request_shutdown();
    })
    .context("failed to install signal handler")?;

    control(&handle, cycles);

    if mainloop_thread.join().is_err() {
        bail!("mainloop thread panicked");
    }
    info!(
        "Finished after {} cycles, data availability {}",
        handle.cycle(),
        handle.query()
    );
    Ok(())
}

/// Observe the pipeline, reset the processors halfway through and stop after `cycles` or
/// on a shutdown signal
fn control(handle: &MainloopHandle, cycles: u64) {
    let mut reset_done = false;
    loop {
        thread::sleep(CONTROL_INTERVAL);
        if handle.is_shutdown_requested() {
            break;
        }
        let cycle = handle.cycle();
        debug!("Cycle {cycle}, data availability {}", handle.query());

        if !reset_done && cycle >= cycles / 2 {
            let signalled = handle.reset_processors(RESET_SOURCE);
            info!("Requested processor reset in cycle {cycle}, {signalled} modules signalled");
            reset_done = true;
        }
        if cycle >= cycles {
            info!("Requesting shutdown in cycle {cycle}");
            handle.request_shutdown();
            break;
        }
    }
}

/// Set the `logLevel` of every module node to `level`
fn seed_log_level(root: &ConfigNode, level: LevelFilter) -> Result<(), Error> {
    let level = level_filter_to_u8(level).to_string();
    for node in root
        .children()
        .into_iter()
        .filter(|node| node.get(pipeline::MODULE_LIBRARY).is_some())
    {
        node.put_from_str(attributes::LOG_LEVEL, "int", &level)?;
    }
    Ok(())
}

/// Apply an override of the form `<node> <key> <type> <value>`
fn apply_override(root: &ConfigNode, entry: &str) -> Result<(), Error> {
    let mut parts = entry.trim().splitn(4, char::is_whitespace);
    let (Some(node), Some(key), Some(value_type), Some(value)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("expected \"<node> <key> <type> <value>\"");
    };
    root.node_at(node)?
        .put_from_str(key, value_type, value.trim())?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overrides_update_the_tree() {
        let root = ConfigNode::root();
        root.import_json_str(config::DEFAULT_CONFIG)
            .expect("valid default configuration");

        apply_override(&root, "filter hotPixelLimit int 12").expect("valid override");
        apply_override(&root, "/camera/ label string left camera").expect("valid override");
        let filter = root.node_at("filter").expect("valid path");
        assert_eq!(filter.get_int("hotPixelLimit").ok(), Some(12));
        let camera = root.node_at("camera").expect("valid path");
        assert_eq!(camera.get_string("label").ok().as_deref(), Some("left camera"));

        assert!(apply_override(&root, "filter hotPixelLimit").is_err());
        assert!(apply_override(&root, "filter hotPixelLimit string high").is_err());
    }

    #[test]
    fn log_level_option_seeds_module_nodes() {
        let root = ConfigNode::root();
        root.import_json_str(config::DEFAULT_CONFIG)
            .expect("valid default configuration");
        seed_log_level(&root, LevelFilter::Debug).expect("module nodes");

        for name in ["camera", "filter", "statistics"] {
            let node = root.node_at(name).expect("valid path");
            assert_eq!(node.get_int(attributes::LOG_LEVEL).ok(), Some(4), "{name}");
        }

        // Registration keeps the seeded level
        let mainloop = pipeline::from_config(&root, &config::catalog())
            .and_then(|builder| builder.build())
            .expect("valid pipeline");
        let node = mainloop
            .config_node(ModuleId::new(3))
            .expect("present");
        assert_eq!(node.get_int(attributes::LOG_LEVEL).ok(), Some(4));
    }

    #[test]
    fn default_pipeline_resolves() {
        let root = ConfigNode::root();
        root.import_json_str(config::DEFAULT_CONFIG)
            .expect("valid default configuration");
        let mainloop = pipeline::from_config(&root, &config::catalog())
            .and_then(|builder| builder.build())
            .expect("valid pipeline");
        let order: Vec<u16> = mainloop.graph().order().iter().map(u16::from).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
