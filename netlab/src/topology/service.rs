use crate::error::CompileError;
use crate::topology::binding::{Binding, BindingOptions};
use crate::topology::registry::{NetworkInterface, ServiceId};
use bon::Builder;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::num::NonZeroU32;

/// Docker refuses memory limits below this value
pub const MIN_MEMORY_MB: u32 = 6;

/// The maximum number of upstream name servers a service may list
pub const MAX_NAMESERVERS: usize = 64;

/// The kinds of service, declared in manifest emission order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    Http,
    Client,
    TrafficGenerator,
    Dhcp,
    Dns,
    LoadBalancer,
    Router,
    Tor,
}

impl ServiceKind {
    /// The prefix of the names of services of this kind
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Http => "http",
            ServiceKind::Client => "client",
            ServiceKind::TrafficGenerator => "tgen",
            ServiceKind::Dhcp => "dhcp",
            ServiceKind::Dns => "dns",
            ServiceKind::LoadBalancer => "lb",
            ServiceKind::Router => "router",
            ServiceKind::Tor => "tor",
        }
    }

    pub fn default_image(&self) -> &'static str {
        match self {
            ServiceKind::Http => "nginx",
            ServiceKind::TrafficGenerator => "locust",
            other => other.label(),
        }
    }
}

macro_rules! keyword_display {
    ($($ty:ty),*) => {
        $(
            impl Display for $ty {
                fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

keyword_display!(
    SynCookieMode,
    CongestionControl,
    EcmpMode,
    LbType,
    LbAlgorithm,
    Protocol
);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynCookieMode {
    Disable,
    #[default]
    Enable,
    Force,
}

impl SynCookieMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynCookieMode::Disable => "disable",
            SynCookieMode::Enable => "enable",
            SynCookieMode::Force => "force",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionControl {
    #[default]
    Cubic,
    Reno,
}

impl CongestionControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CongestionControl::Cubic => "cubic",
            CongestionControl::Reno => "reno",
        }
    }
}

/// Granularity of equal-cost multi-path routing
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcmpMode {
    #[default]
    None,
    /// Hash on addresses
    L3,
    /// Hash on addresses and ports
    L4,
}

impl EcmpMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EcmpMode::None => "none",
            EcmpMode::L3 => "l3",
            EcmpMode::L4 => "l4",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LbType {
    L4,
    #[default]
    L5,
}

impl LbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LbType::L4 => "l4",
            LbType::L5 => "l5",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LbAlgorithm {
    Random,
    #[default]
    RoundRobin,
    /// Pin clients to a backend based on their source address
    Source,
    LeastConn,
}

impl LbAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            LbAlgorithm::Random => "random",
            LbAlgorithm::RoundRobin => "roundrobin",
            LbAlgorithm::Source => "source",
            LbAlgorithm::LeastConn => "leastconn",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Settings shared by every kind of service
#[derive(Clone, Debug, Builder)]
pub struct ServiceOptions {
    /// Overrides the default image of the service kind
    #[builder(into)]
    pub image: Option<String>,
    /// CPU time limit, 0.1 being 10% of a logical core
    #[builder(default = 0.5)]
    pub cpus: f64,
    #[builder(default = 256)]
    pub memory_mb: u32,
    /// Swap on top of the memory limit, 0 disabling swap entirely
    pub swap_mb: Option<u32>,
    #[builder(default)]
    pub nameservers: Vec<Ipv4Addr>,
    /// Packet forwarding, enabled by default for routers only
    pub forward: Option<bool>,
    #[builder(default)]
    pub syn_cookie: SynCookieMode,
    #[builder(default)]
    pub congestion_control: CongestionControl,
    #[builder(default = 64)]
    pub ttl: u16,
    #[builder(default = true)]
    pub early_retransmit: bool,
    #[builder(default = true)]
    pub sack: bool,
    #[builder(default = true)]
    pub timestamps: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServiceOptions {
    fn validate(&self, service: &str) -> Result<(), CompileError> {
        if !self.cpus.is_finite() || self.cpus <= 0.0 {
            return Err(CompileError::limit(
                service,
                "cpus",
                format!("must be positive, got {}", self.cpus),
            ));
        }

        if self.memory_mb < MIN_MEMORY_MB {
            return Err(CompileError::limit(
                service,
                "memory",
                format!(
                    "must be at least {MIN_MEMORY_MB} MB, got {} MB",
                    self.memory_mb
                ),
            ));
        }

        if !(1..=255).contains(&self.ttl) {
            return Err(CompileError::limit(
                service,
                "ttl",
                format!("must be between 1 and 255, got {}", self.ttl),
            ));
        }

        if self.nameservers.len() > MAX_NAMESERVERS {
            return Err(CompileError::limit(
                service,
                "nameservers",
                format!(
                    "cannot list more than {MAX_NAMESERVERS} servers, got {}",
                    self.nameservers.len()
                ),
            ));
        }

        Ok(())
    }
}

/// Locust-driven HTTP load towards a target
#[derive(Clone, Debug, Builder)]
pub struct TrafficGenerator {
    /// Address or domain name of the target server
    #[builder(into)]
    pub target: String,
    #[builder(default)]
    pub protocol: Protocol,
    #[builder(default = vec!["/".to_string()])]
    pub pages: Vec<String>,
    /// Maximum number of simultaneous connections
    #[builder(default = 500)]
    pub max_connections: u32,
    /// New connections per second
    #[builder(default = 5)]
    pub connection_rate: u32,
    #[builder(default = 5.0)]
    pub wait_min_secs: f64,
    #[builder(default = 15.0)]
    pub wait_max_secs: f64,
}

impl TrafficGenerator {
    fn validate(&self, service: &str) -> Result<(), CompileError> {
        if self.target.is_empty() {
            return Err(CompileError::limit(service, "target", "cannot be empty"));
        }
        if self.pages.is_empty() {
            return Err(CompileError::limit(
                service,
                "pages",
                "must list at least one page",
            ));
        }
        if let Some(page) = self.pages.iter().find(|page| page.contains(',')) {
            return Err(CompileError::limit(
                service,
                "pages",
                format!("a page cannot contain a comma, got `{page}`"),
            ));
        }
        if self.max_connections == 0 {
            return Err(CompileError::limit(service, "max_connections", "must be positive"));
        }
        if self.connection_rate == 0 {
            return Err(CompileError::limit(service, "connection_rate", "must be positive"));
        }
        if !(self.wait_min_secs >= 0.0) {
            return Err(CompileError::limit(
                service,
                "wait_min",
                format!("cannot be negative, got {}", self.wait_min_secs),
            ));
        }
        if !(self.wait_min_secs <= self.wait_max_secs) {
            return Err(CompileError::limit(
                service,
                "wait_max",
                format!(
                    "must be at least wait_min ({}), got {}",
                    self.wait_min_secs, self.wait_max_secs
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Builder)]
pub struct DhcpServer {
    #[builder(default = 600)]
    pub lease_time_secs: u32,
}

impl Default for DhcpServer {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, Builder)]
pub struct DnsServer {
    #[builder(default = 600)]
    pub cache_ttl_secs: u32,
    #[builder(default)]
    pub log_queries: bool,
    #[builder(skip)]
    pub(crate) records: Vec<(String, Ipv4Addr)>,
}

impl Default for DnsServer {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DnsServer {
    /// Registered names in registration order; a name may resolve to several addresses
    pub fn records(&self) -> &[(String, Ipv4Addr)] {
        &self.records
    }
}

#[derive(Clone, Debug, Builder)]
pub struct LoadBalancer {
    pub backends: Vec<Ipv4Addr>,
    #[builder(default)]
    pub lb_type: LbType,
    #[builder(default)]
    pub algorithm: LbAlgorithm,
    /// Advertise the virtual address through the routing protocol
    #[builder(default)]
    pub advertise: bool,
    /// Path polled on the backends, only meaningful for L5 balancing
    #[builder(into)]
    pub health_check: Option<String>,
}

#[derive(Clone, Debug, Default, Builder)]
pub struct Router {
    #[builder(default)]
    pub ecmp: EcmpMode,
}

#[derive(Clone, Debug, Default, Builder)]
pub struct TorNode {
    /// The directory authority this node reports to; a node without one is an authority
    pub directory: Option<ServiceId>,
    #[builder(default)]
    pub bridge: bool,
    #[builder(default)]
    pub exit: bool,
}

/// The role-specific part of a service
#[derive(Clone, Debug)]
pub enum Role {
    Http,
    Client,
    TrafficGenerator(TrafficGenerator),
    Dhcp(DhcpServer),
    Dns(DnsServer),
    LoadBalancer(LoadBalancer),
    Router(Router),
    Tor(TorNode),
}

impl Role {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Role::Http => ServiceKind::Http,
            Role::Client => ServiceKind::Client,
            Role::TrafficGenerator(_) => ServiceKind::TrafficGenerator,
            Role::Dhcp(_) => ServiceKind::Dhcp,
            Role::Dns(_) => ServiceKind::Dns,
            Role::LoadBalancer(_) => ServiceKind::LoadBalancer,
            Role::Router(_) => ServiceKind::Router,
            Role::Tor(_) => ServiceKind::Tor,
        }
    }

    /// Routers and load balancers take part in route advertisement
    pub fn needs_router_id(&self) -> bool {
        matches!(self, Role::Router(_) | Role::LoadBalancer(_))
    }

    fn validate(&self, service: &str) -> Result<(), CompileError> {
        match self {
            Role::TrafficGenerator(tgen) => tgen.validate(service),
            Role::Dhcp(dhcp) if dhcp.lease_time_secs == 0 => {
                Err(CompileError::limit(service, "lease_time", "must be positive"))
            }
            Role::LoadBalancer(lb) if lb.backends.is_empty() => Err(CompileError::limit(
                service,
                "backends",
                "must list at least one backend",
            )),
            _ => Ok(()),
        }
    }
}

/// Identifier advertised by routers and load balancers, unique within a topology
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouterId(pub(crate) NonZeroU32);

impl RouterId {
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl Display for RouterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Service {
    pub(crate) id: ServiceId,
    pub(crate) name: String,
    pub(crate) image: String,
    pub(crate) options: ServiceOptions,
    pub(crate) forward: bool,
    pub(crate) role: Role,
    pub(crate) router_id: Option<RouterId>,
    pub(crate) bindings: Vec<Binding>,
}

impl Service {
    pub(crate) fn new(
        id: ServiceId,
        options: ServiceOptions,
        role: Role,
        router_id: Option<RouterId>,
    ) -> Result<Self, CompileError> {
        let name = id.to_string();
        options.validate(&name)?;
        role.validate(&name)?;

        let kind = role.kind();
        Ok(Self {
            id,
            image: options
                .image
                .clone()
                .unwrap_or_else(|| kind.default_image().to_string()),
            forward: options.forward.unwrap_or(kind == ServiceKind::Router),
            name,
            options,
            role,
            router_id,
            bindings: Vec::new(),
        })
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ServiceKind {
        self.id.kind
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn forward(&self) -> bool {
        self.forward
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn router_id(&self) -> Option<RouterId> {
        self.router_id
    }

    /// The bindings of this service, in the order they were added
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub(crate) fn attach(
        &mut self,
        iface: &NetworkInterface,
        options: BindingOptions,
    ) -> Result<(), CompileError> {
        if self.kind() == ServiceKind::Dhcp && !self.bindings.is_empty() {
            return Err(CompileError::MultipleDhcpInterfaces {
                service: self.name.clone(),
            });
        }

        if self.bindings.iter().any(|b| b.iface == iface.id) {
            return Err(CompileError::DuplicateBinding {
                service: self.name.clone(),
                iface: iface.name.clone(),
            });
        }

        let binding = Binding::new(&self.name, self.kind(), iface, options)?;
        self.bindings.push(binding);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn new_service(options: ServiceOptions, role: Role) -> Result<Service, CompileError> {
        let id = ServiceId {
            registry: 0,
            kind: role.kind(),
            index: 0,
        };
        Service::new(id, options, role, None)
    }

    #[test]
    fn test_defaults() {
        let client = new_service(ServiceOptions::default(), Role::Client).unwrap();
        assert_eq!(client.name(), "client-0");
        assert_eq!(client.image(), "client");
        assert!(!client.forward());
        assert_eq!(client.options().ttl, 64);
        assert_eq!(client.options().memory_mb, 256);

        let router = new_service(ServiceOptions::default(), Role::Router(Router::default())).unwrap();
        assert_eq!(router.name(), "router-0");
        assert!(router.forward());

        let tgen = TrafficGenerator::builder().target("10.0.0.1").build();
        let tgen = new_service(ServiceOptions::default(), Role::TrafficGenerator(tgen)).unwrap();
        assert_eq!(tgen.name(), "tgen-0");
        assert_eq!(tgen.image(), "locust");

        let http = new_service(
            ServiceOptions::builder().image("httpd:2.4").build(),
            Role::Http,
        )
        .unwrap();
        assert_eq!(http.image(), "httpd:2.4");
    }

    #[test]
    fn test_resource_limits() {
        let invalid = [
            (ServiceOptions::builder().cpus(0.0).build(), "cpus"),
            (ServiceOptions::builder().cpus(f64::NAN).build(), "cpus"),
            (ServiceOptions::builder().memory_mb(5).build(), "memory"),
            (ServiceOptions::builder().ttl(0).build(), "ttl"),
            (ServiceOptions::builder().ttl(256).build(), "ttl"),
            (
                ServiceOptions::builder()
                    .nameservers(vec![Ipv4Addr::LOCALHOST; 65])
                    .build(),
                "nameservers",
            ),
        ];

        for (options, expected) in invalid {
            let result = new_service(options, Role::Client);
            assert!(
                matches!(
                    result,
                    Err(CompileError::ResourceLimitViolation { field, .. }) if field == expected
                ),
                "{expected}"
            );
        }

        let valid = ServiceOptions::builder()
            .memory_mb(MIN_MEMORY_MB)
            .ttl(255)
            .nameservers(vec![Ipv4Addr::LOCALHOST; MAX_NAMESERVERS])
            .build();
        assert!(new_service(valid, Role::Client).is_ok());
    }

    #[test]
    fn test_role_limits() {
        let lb = LoadBalancer::builder().backends(Vec::new()).build();
        assert!(matches!(
            new_service(ServiceOptions::default(), Role::LoadBalancer(lb)),
            Err(CompileError::ResourceLimitViolation { field: "backends", .. })
        ));

        let tgen = TrafficGenerator::builder()
            .target("example.com")
            .pages(Vec::new())
            .build();
        assert!(matches!(
            new_service(ServiceOptions::default(), Role::TrafficGenerator(tgen)),
            Err(CompileError::ResourceLimitViolation { field: "pages", .. })
        ));

        let tgen = TrafficGenerator::builder()
            .target("example.com")
            .pages(vec!["/".to_string(), "/search?q=a,b".to_string()])
            .build();
        assert!(matches!(
            new_service(ServiceOptions::default(), Role::TrafficGenerator(tgen)),
            Err(CompileError::ResourceLimitViolation { field: "pages", .. })
        ));

        let tgen = TrafficGenerator::builder()
            .target("example.com")
            .wait_min_secs(10.0)
            .wait_max_secs(1.0)
            .build();
        assert!(matches!(
            new_service(ServiceOptions::default(), Role::TrafficGenerator(tgen)),
            Err(CompileError::ResourceLimitViolation { field: "wait_max", .. })
        ));

        let dhcp = DhcpServer::builder().lease_time_secs(0).build();
        assert!(matches!(
            new_service(ServiceOptions::default(), Role::Dhcp(dhcp)),
            Err(CompileError::ResourceLimitViolation { field: "lease_time", .. })
        ));
    }

    #[test]
    fn test_duplicate_binding() {
        let iface = NetworkInterface {
            id: crate::topology::registry::IfaceId {
                registry: 0,
                index: 3,
            },
            name: "network-3".to_string(),
            cidr: None,
        };
        let mut client = new_service(ServiceOptions::default(), Role::Client).unwrap();
        client.attach(&iface, BindingOptions::default()).unwrap();
        assert_eq!(
            client.attach(&iface, BindingOptions::default()),
            Err(CompileError::DuplicateBinding {
                service: "client-0".to_string(),
                iface: "network-3".to_string(),
            })
        );
        assert_eq!(client.bindings().len(), 1);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(LbAlgorithm::RoundRobin.to_string(), "roundrobin");
        assert_eq!(LbAlgorithm::LeastConn.to_string(), "leastconn");
        assert_eq!(SynCookieMode::default().to_string(), "enable");
        assert_eq!(EcmpMode::default().to_string(), "none");
        assert_eq!(ServiceKind::LoadBalancer.default_image(), "lb");
        assert_eq!(ServiceKind::Http.default_image(), "nginx");
    }
}
