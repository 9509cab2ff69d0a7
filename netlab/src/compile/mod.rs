//! Compilation of a topology into a docker-compose manifest
//!
//! Per-interface settings reach the containers as space-separated lists in environment
//! variables, where the n-th element of every list describes the n-th binding of the service.
//! Bindings are handled as records until [`flatten_bindings`], the only place that knows about
//! that positional layout.

pub mod allocator;
pub mod manifest;
pub mod shaping;

use crate::address::Ipv4Cidr;
use crate::error::CompileError;
use crate::topology::binding::Binding;
use crate::topology::registry::Registry;
use crate::topology::service::{Role, Service, ServiceKind};
use allocator::SubnetAllocator;
use bon::Builder;
use indexmap::IndexMap;
use manifest::{
    Deploy, IFACE_PREFIX_OPTION, Ipam, IpamConfig, Limits, Logging, Manifest, NetworkEntry,
    Resources, ServiceEntry,
};
use shaping::{DEFAULT_HZ, DEFAULT_MTU, burst_kbit_for_kbit_rate};
use std::fmt::Display;
use std::net::Ipv4Addr;

pub const DEFAULT_SUBNET_POOL: Ipv4Cidr =
    Ipv4Cidr::known_private(Ipv4Addr::new(10, 0, 0, 0), 8);
pub const DEFAULT_SUBNET_PREFIX_LEN: u8 = 22;

/// Emitted in place of absent values, so lists keep one element per binding
pub const NONE: &str = "none";

#[derive(Clone, Debug, Builder)]
pub struct CompilerConfig {
    /// The pool throwaway network subnets are taken from
    #[builder(default = DEFAULT_SUBNET_POOL)]
    pub subnet_pool: Ipv4Cidr,
    /// The prefix length of each throwaway subnet
    #[builder(default = DEFAULT_SUBNET_PREFIX_LEN)]
    pub subnet_prefix_len: u8,
    /// Kernel timer frequency used to derive token bucket bursts
    #[builder(default = DEFAULT_HZ)]
    pub hz: u32,
    /// Volume mounted in every container
    #[builder(default = "./shared:/app/shared".to_string(), into)]
    pub shared_volume: String,
    #[builder(default = "json-file".to_string(), into)]
    pub log_driver: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Compiles every entity of the registry into a manifest
///
/// Nothing is returned unless the whole registry compiled, so a failure never leaves a
/// partial manifest behind.
pub fn compile(registry: &Registry, config: &CompilerConfig) -> Result<Manifest, CompileError> {
    let mut allocator = SubnetAllocator::new(config.subnet_pool, config.subnet_prefix_len)?;
    let mut manifest = Manifest::default();

    for iface in registry.interfaces() {
        let subnet = allocator.next()?;
        tracing::debug!("{}: throwaway subnet {subnet}", iface.name());
        manifest
            .networks
            .insert(iface.name().to_string(), network_entry(iface.name(), subnet));
    }

    for service in registry.services() {
        tracing::debug!(
            "{}: {} binding(s), image {}",
            service.name(),
            service.bindings().len(),
            service.image()
        );
        manifest
            .services
            .insert(service.name().to_string(), service_entry(service, config));
    }

    tracing::info!(
        "compiled {} services and {} networks",
        manifest.services.len(),
        manifest.networks.len()
    );

    Ok(manifest)
}

fn network_entry(name: &str, subnet: Ipv4Cidr) -> NetworkEntry {
    NetworkEntry {
        name: name.to_string(),
        driver: "bridge".to_string(),
        internal: true,
        ipam: Ipam {
            config: vec![IpamConfig {
                subnet: subnet.to_string(),
            }],
        },
        driver_opts: IndexMap::from([(IFACE_PREFIX_OPTION.to_string(), format!("{name}_"))]),
    }
}

fn service_entry(service: &Service, config: &CompilerConfig) -> ServiceEntry {
    let options = service.options();
    ServiceEntry {
        container_name: service.name().to_string(),
        image: service.image().to_string(),
        restart: "unless-stopped".to_string(),
        deploy: Deploy {
            resources: Resources {
                limits: Limits {
                    cpus: options.cpus.to_string(),
                    memory: format!("{}M", options.memory_mb),
                },
            },
        },
        memswap_limit: options
            .swap_mb
            .map(|swap| format!("{}M", u64::from(options.memory_mb) + u64::from(swap))),
        volumes: vec![config.shared_volume.clone()],
        logging: Logging {
            driver: config.log_driver.clone(),
        },
        networks: service
            .bindings()
            .iter()
            .map(|binding| binding.iface().to_string())
            .collect(),
        cap_add: vec!["NET_ADMIN".to_string()],
        privileged: true,
        environment: environment(service, config.hz),
    }
}

#[derive(Default)]
struct Environment(IndexMap<String, String>);

impl Environment {
    fn set(&mut self, key: &str, value: impl Display) {
        self.0.insert(key.to_string(), value.to_string());
    }
}

fn environment(service: &Service, hz: u32) -> IndexMap<String, String> {
    let options = service.options();
    let mut env = Environment::default();

    env.set("FORWARD", service.forward());
    env.set("SYN_COOKIE", options.syn_cookie);
    env.set("CONGESTION_CONTROL", options.congestion_control);
    env.set("TTL", options.ttl);
    env.set("EARLY_RETRANSMIT", options.early_retransmit);
    env.set("SACK", options.sack);
    env.set("TIMESTAMPS", options.timestamps);
    env.set("NAMESERVERS", join(&options.nameservers, " "));

    let records: Vec<_> = service
        .bindings()
        .iter()
        .map(|binding| BindingRecord::new(binding, hz))
        .collect();
    flatten_bindings(&mut env, service.kind(), &records);

    let router_id = service.router_id().map(|id| id.to_string());
    match service.role() {
        Role::Http | Role::Client => {}
        Role::TrafficGenerator(tgen) => {
            env.set("DESTINATION_IP", &tgen.target);
            env.set("PROTOCOL", tgen.protocol);
            env.set("PAGES", tgen.pages.join(","));
            env.set("MAX_CONNECTIONS", tgen.max_connections);
            env.set("RATE_OF_NEW_CONNECTIONS", tgen.connection_rate);
            env.set("WAIT_BETWEEN_PAGES_MIN", tgen.wait_min_secs);
            env.set("WAIT_BETWEEN_PAGES_MAX", tgen.wait_max_secs);
        }
        Role::Dhcp(dhcp) => {
            env.set("LEASE_TIME", dhcp.lease_time_secs);
        }
        Role::Dns(dns) => {
            let (names, addresses): (Vec<_>, Vec<_>) = dns
                .records()
                .iter()
                .map(|(name, address)| (name.as_str(), *address))
                .unzip();
            env.set("CACHE_TTL", dns.cache_ttl_secs);
            env.set("LOG_QUERIES", dns.log_queries);
            env.set("HOST_NAMES", names.join(" "));
            env.set("HOST_IPS", join(&addresses, " "));
        }
        Role::LoadBalancer(lb) => {
            env.set("BACKENDS", join(&lb.backends, " "));
            env.set("TYPE", lb.lb_type);
            env.set("ALGORITHM", lb.algorithm);
            env.set("ADVERTISE", lb.advertise);
            env.set("HEALTH_CHECK", or_none(lb.health_check.as_ref()));
            env.set("ROUTER_ID", or_none(router_id));
        }
        Role::Router(router) => {
            env.set("ECMP", router.ecmp);
            env.set("ROUTER_ID", or_none(router_id));
        }
        Role::Tor(tor) => {
            env.set("TOR_DIRECTORY", or_none(tor.directory));
            env.set("TOR_BRIDGE", tor.bridge);
            env.set("TOR_EXIT", tor.exit);
        }
    }

    env.0
}

/// The values of one binding, as they appear in the manifest
struct BindingRecord {
    iface: String,
    ip: String,
    cidr: String,
    netmask: String,
    visibility: String,
    gateway: String,
    mtu: String,
    firewall: String,
    rate: String,
    burst: String,
    delay: String,
    jitter: String,
    drop: String,
    corrupt: String,
    duplicate: String,
    queue_limit: String,
    nat: String,
    cost: String,
    lease_start: String,
    lease_end: String,
}

impl BindingRecord {
    fn new(binding: &Binding, hz: u32) -> Self {
        let cidr = binding.cidr();
        let tc = binding.tc.as_ref();
        let burst = tc.filter(|tc| tc.rate_kbit > 0).map(|tc| {
            burst_kbit_for_kbit_rate(tc.rate_kbit, hz, binding.mtu.unwrap_or(DEFAULT_MTU))
        });

        Self {
            iface: binding.iface().to_string(),
            ip: or_none(binding.address()),
            cidr: or_none(cidr),
            netmask: or_none(cidr.map(|cidr| cidr.netmask())),
            visibility: or_none(cidr.map(|cidr| cidr.visibility())),
            gateway: or_none(binding.gateway()),
            mtu: or_none(binding.mtu),
            firewall: binding.firewall.to_string(),
            rate: or_none(tc.map(|tc| tc.rate_kbit)),
            burst: or_none(burst),
            delay: or_none(tc.map(|tc| tc.delay_ms)),
            jitter: or_none(tc.map(|tc| tc.jitter_ms)),
            drop: or_none(tc.map(|tc| tc.drop_percent)),
            corrupt: or_none(tc.map(|tc| tc.corrupt_percent)),
            duplicate: or_none(tc.map(|tc| tc.duplicate_percent)),
            queue_limit: or_none(tc.map(|tc| tc.queue_limit)),
            nat: binding.nat.to_string(),
            cost: or_none(binding.cost),
            lease_start: or_none(binding.lease().map(|(start, _)| start)),
            lease_end: or_none(binding.lease().map(|(_, end)| end)),
        }
    }
}

type Column = (&'static str, fn(&BindingRecord) -> &str);

const COMMON_COLUMNS: &[Column] = &[
    ("IFACES", |r| r.iface.as_str()),
    ("IPS", |r| r.ip.as_str()),
    ("CIDRS", |r| r.cidr.as_str()),
    ("NET_MASKS", |r| r.netmask.as_str()),
    ("VISIBILITIES", |r| r.visibility.as_str()),
    ("GATEWAYS", |r| r.gateway.as_str()),
    ("MTUS", |r| r.mtu.as_str()),
    ("FIREWALLS", |r| r.firewall.as_str()),
    ("RATES", |r| r.rate.as_str()),
    ("BURSTS", |r| r.burst.as_str()),
    ("DELAYS", |r| r.delay.as_str()),
    ("JITTERS", |r| r.jitter.as_str()),
    ("DROPS", |r| r.drop.as_str()),
    ("CORRUPTS", |r| r.corrupt.as_str()),
    ("DUPLICATES", |r| r.duplicate.as_str()),
    ("QUEUE_LIMITS", |r| r.queue_limit.as_str()),
];

const ROUTER_COLUMNS: &[Column] = &[
    ("NATS", |r| r.nat.as_str()),
    ("COSTS", |r| r.cost.as_str()),
];

const DHCP_COLUMNS: &[Column] = &[
    ("LEASE_STARTS", |r| r.lease_start.as_str()),
    ("LEASE_ENDS", |r| r.lease_end.as_str()),
];

/// Turns the binding records into one space-separated list per attribute
fn flatten_bindings(env: &mut Environment, kind: ServiceKind, records: &[BindingRecord]) {
    let role_columns = match kind {
        ServiceKind::Router => ROUTER_COLUMNS,
        ServiceKind::Dhcp => DHCP_COLUMNS,
        _ => &[],
    };

    for (key, field) in COMMON_COLUMNS.iter().chain(role_columns) {
        let values: Vec<&str> = records.iter().map(|record| field(record)).collect();
        env.set(key, values.join(" "));
    }
}

fn or_none<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| NONE.to_string(), |value| value.to_string())
}

fn join<T: Display>(values: &[T], separator: &str) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}
