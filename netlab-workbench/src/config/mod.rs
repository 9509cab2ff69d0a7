use crate::config::topology::TopologyJson;
use anyhow::Context;
use netlab::Topology;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub mod cli;
pub mod topology;

pub fn load_topology(path: &Path) -> anyhow::Result<Topology> {
    let file = File::open(path)
        .with_context(|| format!("failed to open topology file at `{}`", path.display()))?;
    let json: TopologyJson = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid topology file at `{}`", path.display()))?;
    json.build()
        .with_context(|| format!("invalid topology in `{}`", path.display()))
}
