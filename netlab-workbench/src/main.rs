use crate::config::cli::CliOpt;
use anyhow::Context;
use clap::Parser;
use netlab::compile::shaping::detect_kernel_hz;
use netlab::{CompilerConfig, grapher};
use std::fs;
use tracing_subscriber::EnvFilter;

mod config;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let options = CliOpt::parse();
    run(&options)
}

fn run(options: &CliOpt) -> anyhow::Result<()> {
    println!("--- Params ---");
    println!("* Topology path: {}", options.topology.display());
    println!(
        "* Subnet pool: {} (one /{} per network)",
        options.subnet_pool, options.subnet_prefix_len
    );

    let hz = match options.hz {
        Some(hz) => hz,
        None => detect_kernel_hz(options.kernel_config.as_deref()),
    };
    println!("* Kernel HZ: {hz}");

    let topology = config::load_topology(&options.topology)?;
    tracing::debug!(
        "loaded {} interfaces and {} services",
        topology.registry().interfaces().len(),
        topology.registry().services().count()
    );

    let config = CompilerConfig::builder()
        .subnet_pool(options.subnet_pool)
        .subnet_prefix_len(options.subnet_prefix_len)
        .hz(hz)
        .build();
    let manifest = netlab::compile(topology.registry(), &config)
        .context("failed to compile the topology")?;
    let yaml = manifest
        .to_yaml()
        .context("failed to serialize the manifest")?;

    println!("--- Services ---");
    for (name, service) in &manifest.services {
        println!(
            "* {name}: image `{}`, {} network(s)",
            service.image,
            service.networks.len()
        );
    }

    println!("--- Networks ---");
    for (name, network) in &manifest.networks {
        let subnet = network
            .ipam
            .config
            .first()
            .map(|config| config.subnet.as_str())
            .unwrap_or_default();
        println!("* {name}: throwaway subnet {subnet}");
    }

    println!("--- Output ---");
    fs::write(&options.output, yaml).with_context(|| {
        format!(
            "failed to write the manifest to `{}`",
            options.output.display()
        )
    })?;
    println!("* Manifest available at {}", options.output.display());

    if let Some(graph_path) = &options.graph {
        let graph = grapher::render(topology.registry(), !options.no_color, options.graph_extra);
        fs::write(graph_path, graph).with_context(|| {
            format!("failed to write the diagram to `{}`", graph_path.display())
        })?;
        println!("* Diagram available at {}", graph_path.display());
    }

    Ok(())
}
