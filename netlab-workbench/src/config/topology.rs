use anyhow::{Context, bail};
use netlab::Ipv4Cidr;
use netlab::topology::Topology;
use netlab::topology::binding::{BindingOptions, FirewallPolicy, NatPolicy, TcRule};
use netlab::topology::registry::{IfaceId, ServiceId};
use netlab::topology::service::{
    CongestionControl, DhcpServer, DnsServer, EcmpMode, LbAlgorithm, LbType, LoadBalancer,
    Protocol, Role, Router, ServiceOptions, SynCookieMode, TorNode, TrafficGenerator,
};
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// A topology as described in a JSON file
///
/// Ids are only used to refer to entities within the file. Entities are created in file
/// order, which determines their generated names.
#[derive(Deserialize, Clone)]
pub struct TopologyJson {
    #[serde(default)]
    interfaces: Vec<InterfaceJson>,
    #[serde(default)]
    services: Vec<ServiceJson>,
}

#[serde_as]
#[derive(Deserialize, Clone)]
struct InterfaceJson {
    id: String,
    #[serde_as(as = "Option<DisplayFromStr>")]
    cidr: Option<Ipv4Cidr>,
}

#[derive(Deserialize, Clone)]
struct ServiceJson {
    id: String,
    #[serde(flatten)]
    common: CommonJson,
    #[serde(flatten)]
    role: RoleJson,
    #[serde(default)]
    interfaces: Vec<BindingJson>,
}

#[serde_as]
#[derive(Deserialize, Clone)]
struct CommonJson {
    image: Option<String>,
    /// CPU time limit, 0.1 being 10% of a logical core
    cpus: Option<f64>,
    memory_mb: Option<u32>,
    /// Swap allowed on top of `memory_mb` (0 disables swap)
    swap_mb: Option<u32>,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    #[serde(default)]
    nameservers: Vec<Ipv4Addr>,
    forward: Option<bool>,
    syn_cookie: Option<SynCookieMode>,
    congestion_control: Option<CongestionControl>,
    ttl: Option<u16>,
    early_retransmit: Option<bool>,
    sack: Option<bool>,
    timestamps: Option<bool>,
}

#[serde_as]
#[derive(Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RoleJson {
    Http,
    Client,
    #[serde(alias = "tgen")]
    TrafficGenerator {
        target: String,
        protocol: Option<Protocol>,
        pages: Option<Vec<String>>,
        max_connections: Option<u32>,
        connection_rate: Option<u32>,
        wait_min_secs: Option<f64>,
        wait_max_secs: Option<f64>,
    },
    Dhcp {
        lease_time_secs: Option<u32>,
    },
    Dns {
        cache_ttl_secs: Option<u32>,
        log_queries: Option<bool>,
        #[serde(default)]
        records: Vec<DnsRecordJson>,
    },
    #[serde(alias = "lb")]
    LoadBalancer {
        #[serde_as(as = "Vec<DisplayFromStr>")]
        backends: Vec<Ipv4Addr>,
        lb_type: Option<LbType>,
        algorithm: Option<LbAlgorithm>,
        advertise: Option<bool>,
        health_check: Option<String>,
    },
    Router {
        ecmp: Option<EcmpMode>,
    },
    Tor {
        /// Id of the directory authority, absent for authorities themselves
        directory: Option<String>,
        bridge: Option<bool>,
        exit: Option<bool>,
    },
}

#[derive(Deserialize, Clone)]
struct DnsRecordJson {
    name: String,
    ip: String,
}

#[serde_as]
#[derive(Deserialize, Clone)]
struct BindingJson {
    iface: String,
    #[serde_as(as = "Option<DisplayFromStr>")]
    cidr: Option<Ipv4Cidr>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    ip: Option<Ipv4Addr>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    gateway: Option<Ipv4Addr>,
    mtu: Option<u16>,
    tc: Option<TcJson>,
    #[serde(default)]
    firewall: FirewallPolicy,
    #[serde(default)]
    nat: NatPolicy,
    cost: Option<u32>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    lease_start: Option<Ipv4Addr>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    lease_end: Option<Ipv4Addr>,
}

#[derive(Deserialize, Clone)]
struct TcJson {
    /// Rate limit in kbit/s
    rate_kbit: Option<u32>,
    drop_percent: Option<u8>,
    corrupt_percent: Option<u8>,
    duplicate_percent: Option<u8>,
    delay_ms: Option<u32>,
    jitter_ms: Option<u32>,
    /// Queue length in packets
    queue_limit: Option<u32>,
}

impl TopologyJson {
    /// Replays the file through a [`Topology`], which validates every entity
    pub fn build(self) -> anyhow::Result<Topology> {
        let mut topology = Topology::new();

        let mut ifaces: HashMap<String, IfaceId> = HashMap::new();
        for iface in self.interfaces {
            let id = topology.new_iface(iface.cidr);
            if ifaces.insert(iface.id.clone(), id).is_some() {
                bail!("duplicate interface id `{}`", iface.id);
            }
        }

        let mut services: HashMap<String, ServiceId> = HashMap::new();
        for service in self.services {
            if services.contains_key(&service.id) {
                bail!("duplicate service id `{}`", service.id);
            }

            let (role, records) = service
                .role
                .into_role(&services)
                .with_context(|| format!("invalid service `{}`", service.id))?;
            let id = topology
                .add_service(service.common.into(), role)
                .with_context(|| format!("invalid service `{}`", service.id))?;

            for binding in service.interfaces {
                let iface = *ifaces.get(&binding.iface).with_context(|| {
                    format!(
                        "service `{}` refers to unknown interface `{}`",
                        service.id, binding.iface
                    )
                })?;
                topology
                    .add_iface(id, iface, binding.into())
                    .with_context(|| format!("invalid interface of service `{}`", service.id))?;
            }

            for record in records {
                topology
                    .register_domain(id, &record.name, &record.ip)
                    .with_context(|| format!("invalid record of service `{}`", service.id))?;
            }

            services.insert(service.id, id);
        }

        Ok(topology)
    }
}

impl RoleJson {
    fn into_role(
        self,
        services: &HashMap<String, ServiceId>,
    ) -> anyhow::Result<(Role, Vec<DnsRecordJson>)> {
        let mut records = Vec::new();
        let role = match self {
            RoleJson::Http => Role::Http,
            RoleJson::Client => Role::Client,
            RoleJson::TrafficGenerator {
                target,
                protocol,
                pages,
                max_connections,
                connection_rate,
                wait_min_secs,
                wait_max_secs,
            } => Role::TrafficGenerator(
                TrafficGenerator::builder()
                    .target(target)
                    .maybe_protocol(protocol)
                    .maybe_pages(pages)
                    .maybe_max_connections(max_connections)
                    .maybe_connection_rate(connection_rate)
                    .maybe_wait_min_secs(wait_min_secs)
                    .maybe_wait_max_secs(wait_max_secs)
                    .build(),
            ),
            RoleJson::Dhcp { lease_time_secs } => Role::Dhcp(
                DhcpServer::builder()
                    .maybe_lease_time_secs(lease_time_secs)
                    .build(),
            ),
            RoleJson::Dns {
                cache_ttl_secs,
                log_queries,
                records: dns_records,
            } => {
                records = dns_records;
                Role::Dns(
                    DnsServer::builder()
                        .maybe_cache_ttl_secs(cache_ttl_secs)
                        .maybe_log_queries(log_queries)
                        .build(),
                )
            }
            RoleJson::LoadBalancer {
                backends,
                lb_type,
                algorithm,
                advertise,
                health_check,
            } => Role::LoadBalancer(
                LoadBalancer::builder()
                    .backends(backends)
                    .maybe_lb_type(lb_type)
                    .maybe_algorithm(algorithm)
                    .maybe_advertise(advertise)
                    .maybe_health_check(health_check)
                    .build(),
            ),
            RoleJson::Router { ecmp } => Role::Router(Router::builder().maybe_ecmp(ecmp).build()),
            RoleJson::Tor {
                directory,
                bridge,
                exit,
            } => {
                let directory = directory
                    .map(|directory| {
                        services.get(&directory).copied().with_context(|| {
                            format!("directory `{directory}` must be a previously declared service")
                        })
                    })
                    .transpose()?;
                Role::Tor(
                    TorNode::builder()
                        .maybe_directory(directory)
                        .maybe_bridge(bridge)
                        .maybe_exit(exit)
                        .build(),
                )
            }
        };

        Ok((role, records))
    }
}

impl From<CommonJson> for ServiceOptions {
    fn from(json: CommonJson) -> Self {
        ServiceOptions::builder()
            .maybe_image(json.image)
            .maybe_cpus(json.cpus)
            .maybe_memory_mb(json.memory_mb)
            .maybe_swap_mb(json.swap_mb)
            .nameservers(json.nameservers)
            .maybe_forward(json.forward)
            .maybe_syn_cookie(json.syn_cookie)
            .maybe_congestion_control(json.congestion_control)
            .maybe_ttl(json.ttl)
            .maybe_early_retransmit(json.early_retransmit)
            .maybe_sack(json.sack)
            .maybe_timestamps(json.timestamps)
            .build()
    }
}

impl From<BindingJson> for BindingOptions {
    fn from(json: BindingJson) -> Self {
        BindingOptions::builder()
            .maybe_cidr(json.cidr)
            .maybe_address(json.ip)
            .maybe_gateway(json.gateway)
            .maybe_mtu(json.mtu)
            .maybe_tc(json.tc.map(|tc| tc.into()))
            .firewall(json.firewall)
            .nat(json.nat)
            .maybe_cost(json.cost)
            .maybe_lease_start(json.lease_start)
            .maybe_lease_end(json.lease_end)
            .build()
    }
}

impl From<TcJson> for TcRule {
    fn from(json: TcJson) -> Self {
        TcRule::builder()
            .maybe_rate_kbit(json.rate_kbit)
            .maybe_drop_percent(json.drop_percent)
            .maybe_corrupt_percent(json.corrupt_percent)
            .maybe_duplicate_percent(json.duplicate_percent)
            .maybe_delay_ms(json.delay_ms)
            .maybe_jitter_ms(json.jitter_ms)
            .maybe_queue_limit(json.queue_limit)
            .build()
    }
}
