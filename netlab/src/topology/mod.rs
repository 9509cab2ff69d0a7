//! Construction of a topology: interfaces, services and the bindings between them
//!
//! All validation happens here, as entities are created. A [`Topology`] that was built without
//! errors can be compiled without re-checking any of its entities.

pub mod binding;
pub mod registry;
pub mod service;

use crate::address::{Ipv4Cidr, parse_ipv4};
use crate::error::CompileError;
use binding::BindingOptions;
use registry::{IfaceId, Registry, ServiceId};
use service::{
    DhcpServer, DnsServer, LoadBalancer, Role, Router, RouterId, Service, ServiceKind,
    ServiceOptions, TorNode, TrafficGenerator,
};
use std::net::Ipv4Addr;
use std::num::NonZeroU32;

/// Builder of a network topology, owning the registry of everything created so far
#[derive(Debug, Default)]
pub struct Topology {
    registry: Registry,
    last_router_id: u32,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }

    /// Creates a new network segment, optionally with the subnet services on it will use
    pub fn new_iface(&mut self, cidr: Option<Ipv4Cidr>) -> IfaceId {
        self.registry.push_iface(cidr)
    }

    /// Creates a service of the kind given by `role`
    ///
    /// Routers and load balancers get the next router id, shared between both kinds.
    pub fn add_service(
        &mut self,
        options: ServiceOptions,
        role: Role,
    ) -> Result<ServiceId, CompileError> {
        if let Role::Tor(TorNode {
            directory: Some(directory),
            ..
        }) = &role
        {
            self.check_tor_directory(*directory)?;
        }

        let id = self.registry.next_service_id(role.kind());
        let router_id = if role.needs_router_id() {
            Some(self.peek_router_id(&id)?)
        } else {
            None
        };

        let service = Service::new(id, options, role, router_id)?;
        if let Some(router_id) = router_id {
            self.last_router_id = router_id.get();
        }

        self.registry.push_service(service);
        Ok(id)
    }

    pub fn http(&mut self, options: ServiceOptions) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::Http)
    }

    pub fn client(&mut self, options: ServiceOptions) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::Client)
    }

    pub fn traffic_generator(
        &mut self,
        options: ServiceOptions,
        tgen: TrafficGenerator,
    ) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::TrafficGenerator(tgen))
    }

    pub fn dhcp(
        &mut self,
        options: ServiceOptions,
        dhcp: DhcpServer,
    ) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::Dhcp(dhcp))
    }

    pub fn dns(&mut self, options: ServiceOptions, dns: DnsServer) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::Dns(dns))
    }

    pub fn load_balancer(
        &mut self,
        options: ServiceOptions,
        lb: LoadBalancer,
    ) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::LoadBalancer(lb))
    }

    pub fn router(
        &mut self,
        options: ServiceOptions,
        router: Router,
    ) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::Router(router))
    }

    pub fn tor(&mut self, options: ServiceOptions, tor: TorNode) -> Result<ServiceId, CompileError> {
        self.add_service(options, Role::Tor(tor))
    }

    /// Attaches `service` to `iface`
    ///
    /// Bindings are kept in call order, which is the order of the per-interface values in the
    /// manifest.
    pub fn add_iface(
        &mut self,
        service: ServiceId,
        iface: IfaceId,
        options: BindingOptions,
    ) -> Result<(), CompileError> {
        let iface = self
            .registry
            .interface(iface)
            .cloned()
            .ok_or_else(|| CompileError::UnknownEntity {
                entity: iface.to_string(),
            })?;

        self.service_mut(service)?.attach(&iface, options)
    }

    /// Registers `name` as resolving to `address` on a DNS server
    ///
    /// Registering the same name several times makes it resolve to all of its addresses.
    pub fn register_domain(
        &mut self,
        dns: ServiceId,
        name: &str,
        address: &str,
    ) -> Result<(), CompileError> {
        let address = parse_ipv4(address)?;
        self.register_domain_addr(dns, name, address)
    }

    /// Registers `name` as resolving to an already parsed `address` on a DNS server
    ///
    /// Names are emitted as space-separated tokens, so they cannot contain whitespace.
    pub fn register_domain_addr(
        &mut self,
        dns: ServiceId,
        name: &str,
        address: Ipv4Addr,
    ) -> Result<(), CompileError> {
        let service = self.service_mut(dns)?;
        if name.is_empty() {
            return Err(CompileError::limit(
                service.name.clone(),
                "domain",
                "cannot be empty",
            ));
        }
        if name.contains(char::is_whitespace) {
            return Err(CompileError::limit(
                service.name.clone(),
                "domain",
                format!("cannot contain whitespace, got `{name}`"),
            ));
        }

        let Role::Dns(server) = &mut service.role else {
            return Err(CompileError::WrongServiceKind {
                service: service.name.clone(),
                expected: "DNS server",
            });
        };

        server.records.push((name.to_string(), address));
        Ok(())
    }

    fn service_mut(&mut self, id: ServiceId) -> Result<&mut Service, CompileError> {
        self.registry
            .service_mut(id)
            .ok_or_else(|| CompileError::UnknownEntity {
                entity: id.to_string(),
            })
    }

    fn check_tor_directory(&self, directory: ServiceId) -> Result<(), CompileError> {
        if directory.kind() != ServiceKind::Tor {
            return Err(CompileError::WrongServiceKind {
                service: directory.to_string(),
                expected: "Tor node",
            });
        }

        match self.registry.service(directory) {
            Some(_) => Ok(()),
            None => Err(CompileError::UnknownEntity {
                entity: directory.to_string(),
            }),
        }
    }

    fn peek_router_id(&self, service: &ServiceId) -> Result<RouterId, CompileError> {
        self.last_router_id
            .checked_add(1)
            .and_then(NonZeroU32::new)
            .map(RouterId)
            .ok_or_else(|| CompileError::limit(service.to_string(), "router_id", "exhausted"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::topology::binding::TcRule;

    fn cidr(s: &str) -> Ipv4Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_names_follow_creation_order() {
        let mut topology = Topology::new();
        let net0 = topology.new_iface(Some(cidr("192.168.0.0/24")));
        let net1 = topology.new_iface(None);
        let c0 = topology.client(ServiceOptions::default()).unwrap();
        let h0 = topology.http(ServiceOptions::default()).unwrap();
        let c1 = topology.client(ServiceOptions::default()).unwrap();

        assert_eq!(net0.to_string(), "network-0");
        assert_eq!(net1.to_string(), "network-1");
        assert_eq!(c0.to_string(), "client-0");
        assert_eq!(c1.to_string(), "client-1");
        assert_eq!(h0.to_string(), "http-0");

        let names: Vec<_> = topology.registry().services().map(|s| s.name()).collect();
        assert_eq!(names, ["http-0", "client-0", "client-1"]);
    }

    #[test]
    fn test_second_dhcp_iface_is_rejected() {
        let mut topology = Topology::new();
        let lan = topology.new_iface(Some(cidr("192.168.1.0/24")));
        let other = topology.new_iface(Some(cidr("192.168.2.0/24")));
        let dhcp = topology
            .dhcp(ServiceOptions::default(), DhcpServer::default())
            .unwrap();

        topology
            .add_iface(dhcp, lan, BindingOptions::default())
            .unwrap();
        assert_eq!(
            topology.add_iface(dhcp, other, BindingOptions::default()),
            Err(CompileError::MultipleDhcpInterfaces {
                service: "dhcp-0".to_string()
            })
        );
    }

    #[test]
    fn test_binding_address_is_checked_against_the_iface() {
        let mut topology = Topology::new();
        let net = topology.new_iface(Some(cidr("100.0.0.0/24")));
        let client = topology.client(ServiceOptions::default()).unwrap();

        let outside = BindingOptions::builder()
            .address(Ipv4Addr::new(100, 0, 1, 10))
            .build();
        assert!(matches!(
            topology.add_iface(client, net, outside),
            Err(CompileError::AddressOutOfRange { .. })
        ));

        let inside = BindingOptions::builder()
            .address(Ipv4Addr::new(100, 0, 0, 10))
            .tc(TcRule::builder().delay_ms(20).build())
            .build();
        topology.add_iface(client, net, inside).unwrap();

        let service = topology.registry().service(client).unwrap();
        assert_eq!(service.bindings().len(), 1);
        assert_eq!(
            service.bindings()[0].address(),
            Some(Ipv4Addr::new(100, 0, 0, 10))
        );
    }

    #[test]
    fn test_router_ids_are_shared() {
        let mut topology = Topology::new();
        let r0 = topology
            .router(ServiceOptions::default(), Router::default())
            .unwrap();
        let lb = LoadBalancer::builder()
            .backends(vec![Ipv4Addr::new(10, 0, 0, 2)])
            .build();
        let lb0 = topology.load_balancer(ServiceOptions::default(), lb).unwrap();
        let client = topology.client(ServiceOptions::default()).unwrap();
        let r1 = topology
            .router(ServiceOptions::default(), Router::default())
            .unwrap();

        let id = |s| topology.registry().service(s).unwrap().router_id();
        assert_eq!(id(r0).map(|id| id.get()), Some(1));
        assert_eq!(id(lb0).map(|id| id.get()), Some(2));
        assert_eq!(id(client), None);
        assert_eq!(id(r1).map(|id| id.get()), Some(3));
    }

    #[test]
    fn test_rejected_service_does_not_consume_a_name_or_id() {
        let mut topology = Topology::new();
        let invalid = ServiceOptions::builder().ttl(0).build();
        assert!(topology.router(invalid, Router::default()).is_err());

        let r0 = topology
            .router(ServiceOptions::default(), Router::default())
            .unwrap();
        let router = topology.registry().service(r0).unwrap();
        assert_eq!(router.name(), "router-0");
        assert_eq!(router.router_id().map(|id| id.get()), Some(1));
    }

    #[test]
    fn test_register_domain() {
        let mut topology = Topology::new();
        let dns = topology
            .dns(ServiceOptions::default(), DnsServer::default())
            .unwrap();
        topology.register_domain(dns, "example.com", "10.0.0.2").unwrap();
        topology.register_domain(dns, "example.com", "10.0.0.3").unwrap();

        assert!(matches!(
            topology.register_domain(dns, "example.com", "10.0.0.256"),
            Err(CompileError::InvalidAddress { .. })
        ));
        assert!(matches!(
            topology.register_domain(dns, "", "10.0.0.4"),
            Err(CompileError::ResourceLimitViolation { field: "domain", .. })
        ));
        assert!(matches!(
            topology.register_domain(dns, "a b", "10.0.0.4"),
            Err(CompileError::ResourceLimitViolation { field: "domain", .. })
        ));
        assert!(matches!(
            topology.register_domain(dns, "a\tb", "10.0.0.4"),
            Err(CompileError::ResourceLimitViolation { field: "domain", .. })
        ));

        let client = topology.client(ServiceOptions::default()).unwrap();
        assert!(matches!(
            topology.register_domain(client, "example.com", "10.0.0.4"),
            Err(CompileError::WrongServiceKind { .. })
        ));

        let Role::Dns(server) = topology.registry().service(dns).unwrap().role() else {
            panic!("expected a DNS server");
        };
        assert_eq!(
            server.records(),
            [
                ("example.com".to_string(), Ipv4Addr::new(10, 0, 0, 2)),
                ("example.com".to_string(), Ipv4Addr::new(10, 0, 0, 3)),
            ]
        );
    }

    #[test]
    fn test_tor_directory_must_exist() {
        let mut topology = Topology::new();
        let authority = topology
            .tor(ServiceOptions::default(), TorNode::default())
            .unwrap();
        let relay = TorNode::builder().directory(authority).exit(true).build();
        topology.tor(ServiceOptions::default(), relay).unwrap();

        let client = topology.client(ServiceOptions::default()).unwrap();
        let bogus = TorNode::builder().directory(client).build();
        assert!(matches!(
            topology.tor(ServiceOptions::default(), bogus),
            Err(CompileError::WrongServiceKind { .. })
        ));

        let mut other = Topology::new();
        let foreign = TorNode::builder().directory(authority).build();
        assert!(matches!(
            other.tor(ServiceOptions::default(), foreign),
            Err(CompileError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn test_handles_do_not_cross_topologies() {
        let mut a = Topology::new();
        let mut b = Topology::new();
        let a_net = a.new_iface(None);
        let a_client = a.client(ServiceOptions::default()).unwrap();
        let b_net = b.new_iface(None);
        let b_client = b.client(ServiceOptions::default()).unwrap();
        let b_dns = b
            .dns(ServiceOptions::default(), DnsServer::default())
            .unwrap();

        // Same names, same positions, different owners
        assert_eq!(a_net.to_string(), b_net.to_string());
        assert_eq!(a_client.to_string(), b_client.to_string());
        assert_ne!(a_net, b_net);
        assert_ne!(a_client, b_client);

        assert!(matches!(
            a.add_iface(b_client, b_net, BindingOptions::default()),
            Err(CompileError::UnknownEntity { .. })
        ));
        assert!(matches!(
            a.add_iface(a_client, b_net, BindingOptions::default()),
            Err(CompileError::UnknownEntity { .. })
        ));
        assert!(matches!(
            a.add_iface(b_client, a_net, BindingOptions::default()),
            Err(CompileError::UnknownEntity { .. })
        ));
        assert!(matches!(
            a.register_domain(b_dns, "example.com", "10.0.0.2"),
            Err(CompileError::UnknownEntity { .. })
        ));
        assert!(a.registry().service(b_client).is_none());
        assert!(a.registry().interface(b_net).is_none());
        assert!(a.registry().service(a_client).unwrap().bindings().is_empty());

        a.add_iface(a_client, a_net, BindingOptions::default())
            .unwrap();
    }

    #[test]
    fn test_unknown_iface() {
        let mut topology = Topology::new();
        let mut other = Topology::new();
        let foreign = other.new_iface(None);
        let client = topology.client(ServiceOptions::default()).unwrap();
        assert!(matches!(
            topology.add_iface(client, foreign, BindingOptions::default()),
            Err(CompileError::UnknownEntity { .. })
        ));
    }
}
