use clap::Parser;
use netlab::Ipv4Cidr;
use netlab::compile::{DEFAULT_SUBNET_POOL, DEFAULT_SUBNET_PREFIX_LEN};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(about = "Compiles a network topology into a docker-compose manifest")]
pub struct CliOpt {
    /// Path to the JSON file describing the topology
    #[arg(long)]
    pub topology: PathBuf,

    /// Path the docker-compose manifest is written to
    #[arg(long, default_value = "docker-compose.yml")]
    pub output: PathBuf,

    /// Path the Graphviz diagram of the topology is written to, if any
    #[arg(long)]
    pub graph: Option<PathBuf>,

    /// Do not color the diagram's services by kind
    #[arg(long)]
    pub no_color: bool,

    /// Show addresses in the diagram
    #[arg(long)]
    pub graph_extra: bool,

    /// The range the throwaway docker network subnets are taken from
    #[arg(long, default_value_t = DEFAULT_SUBNET_POOL)]
    pub subnet_pool: Ipv4Cidr,

    /// The prefix length of each throwaway docker network subnet
    #[arg(long, default_value_t = DEFAULT_SUBNET_PREFIX_LEN)]
    pub subnet_prefix_len: u8,

    /// The kernel timer frequency used to derive traffic shaping bursts
    ///
    /// If not provided, it is read from the configuration of the running kernel
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub hz: Option<u32>,

    /// Path to the kernel build configuration used to detect the timer frequency
    #[arg(long)]
    pub kernel_config: Option<PathBuf>,
}
