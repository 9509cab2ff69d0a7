use crate::address::Ipv4Cidr;
use crate::topology::service::{Service, ServiceKind};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

/// Handle to a [`NetworkInterface`] created through a [`crate::topology::Topology`]
///
/// Handles only resolve in the registry that issued them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfaceId {
    pub(crate) registry: u64,
    pub(crate) index: usize,
}

impl Display for IfaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "network-{}", self.index)
    }
}

/// Handle to a [`Service`] created through a [`crate::topology::Topology`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId {
    pub(crate) registry: u64,
    pub(crate) kind: ServiceKind,
    pub(crate) index: usize,
}

impl ServiceId {
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }
}

impl Display for ServiceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind.label(), self.index)
    }
}

/// A logical L2 segment that services attach to
#[derive(Clone, Debug)]
pub struct NetworkInterface {
    pub(crate) id: IfaceId,
    pub(crate) name: String,
    pub(crate) cidr: Option<Ipv4Cidr>,
}

impl NetworkInterface {
    pub fn id(&self) -> IfaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cidr(&self) -> Option<Ipv4Cidr> {
        self.cidr
    }
}

/// Every entity created while building a topology, in creation order
///
/// Entities are only ever appended. The position of an entity within its kind is both its
/// naming suffix and its position in the emitted manifest.
#[derive(Debug)]
pub struct Registry {
    id: u64,
    ifaces: Vec<NetworkInterface>,
    services: BTreeMap<ServiceKind, Vec<Service>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            ifaces: Vec::new(),
            services: BTreeMap::new(),
        }
    }
}

impl Registry {
    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.ifaces
    }

    pub fn interface(&self, id: IfaceId) -> Option<&NetworkInterface> {
        if id.registry != self.id {
            return None;
        }
        self.ifaces.get(id.index)
    }

    /// All services, grouped by kind in emission order, then in creation order
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values().flatten()
    }

    pub fn services_of(&self, kind: ServiceKind) -> &[Service] {
        self.services.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn service(&self, id: ServiceId) -> Option<&Service> {
        if id.registry != self.id {
            return None;
        }
        self.services.get(&id.kind)?.get(id.index)
    }

    pub(crate) fn service_mut(&mut self, id: ServiceId) -> Option<&mut Service> {
        if id.registry != self.id {
            return None;
        }
        self.services.get_mut(&id.kind)?.get_mut(id.index)
    }

    pub(crate) fn push_iface(&mut self, cidr: Option<Ipv4Cidr>) -> IfaceId {
        let id = IfaceId {
            registry: self.id,
            index: self.ifaces.len(),
        };
        self.ifaces.push(NetworkInterface {
            id,
            name: id.to_string(),
            cidr,
        });
        id
    }

    /// Reserves the next handle for a service of the given kind
    pub(crate) fn next_service_id(&self, kind: ServiceKind) -> ServiceId {
        ServiceId {
            registry: self.id,
            kind,
            index: self.services_of(kind).len(),
        }
    }

    pub(crate) fn push_service(&mut self, service: Service) {
        let services = self.services.entry(service.id.kind).or_default();
        debug_assert_eq!(services.len(), service.id.index);
        services.push(service);
    }
}
