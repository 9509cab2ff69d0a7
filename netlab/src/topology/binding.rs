use crate::address::Ipv4Cidr;
use crate::error::CompileError;
use crate::topology::registry::{IfaceId, NetworkInterface};
use crate::topology::service::ServiceKind;
use bon::Builder;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

/// The packet limit of a netem queue when none is configured
pub const DEFAULT_QUEUE_LIMIT: u32 = 1000;

/// The smallest MTU an IPv4 host must accept
pub const MIN_MTU: u16 = 68;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirewallPolicy {
    #[default]
    None,
    /// Drop connections that were not initiated from this side (customer devices)
    BlockNewConnInput,
    /// Like [`FirewallPolicy::BlockNewConnInput`], also blocking well-known service ports
    BlockNewConnInputStrict,
    /// Refuse to initiate connections (datacenter devices)
    BlockNewConnOutput,
    /// Like [`FirewallPolicy::BlockNewConnOutput`], also blocking well-known service ports
    BlockNewConnOutputStrict,
    /// Drop outgoing TCP resets
    BlockRstsOutput,
    /// Drop all TCP and UDP traffic
    BlockL4,
}

impl FirewallPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallPolicy::None => "none",
            FirewallPolicy::BlockNewConnInput => "block_new_conn_input",
            FirewallPolicy::BlockNewConnInputStrict => "block_new_conn_input_strict",
            FirewallPolicy::BlockNewConnOutput => "block_new_conn_output",
            FirewallPolicy::BlockNewConnOutputStrict => "block_new_conn_output_strict",
            FirewallPolicy::BlockRstsOutput => "block_rsts_output",
            FirewallPolicy::BlockL4 => "block_l4",
        }
    }
}

impl Display for FirewallPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatPolicy {
    #[default]
    None,
    /// Source-NAT packets coming from the interface's subnet (customer side of a router)
    SnatInput,
    /// Source-NAT packets leaving through the interface (datacenter side of a router)
    SnatOutput,
}

impl NatPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NatPolicy::None => "none",
            NatPolicy::SnatInput => "snat_input",
            NatPolicy::SnatOutput => "snat_output",
        }
    }
}

impl Display for NatPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic shaping applied to a single binding
///
/// Only one of rate, drop, delay and corrupt may be active on the same interface. Chain
/// services through extra interfaces when several effects are needed.
#[derive(Clone, Debug, PartialEq, Builder)]
pub struct TcRule {
    /// Rate limit in kbit/s, 0 meaning unlimited
    #[builder(default)]
    pub rate_kbit: u32,
    #[builder(default)]
    pub drop_percent: u8,
    #[builder(default)]
    pub corrupt_percent: u8,
    #[builder(default)]
    pub duplicate_percent: u8,
    #[builder(default)]
    pub delay_ms: u32,
    #[builder(default)]
    pub jitter_ms: u32,
    /// Queue length in packets
    #[builder(default = DEFAULT_QUEUE_LIMIT)]
    pub queue_limit: u32,
}

impl TcRule {
    pub fn validate(&self) -> Result<(), CompileError> {
        for (name, percent) in [
            ("drop", self.drop_percent),
            ("corrupt", self.corrupt_percent),
            ("duplicate", self.duplicate_percent),
        ] {
            if percent > 100 {
                return Err(CompileError::tc(format!(
                    "{name} percentage must be between 0 and 100, got {percent}"
                )));
            }
        }

        if self.jitter_ms > self.delay_ms {
            return Err(CompileError::tc(format!(
                "jitter ({} ms) cannot exceed delay ({} ms)",
                self.jitter_ms, self.delay_ms
            )));
        }

        if self.queue_limit == 0 {
            return Err(CompileError::tc("queue limit must be positive"));
        }

        let active: Vec<_> = [
            ("rate", self.rate_kbit > 0),
            ("drop", self.drop_percent > 0),
            ("delay", self.delay_ms > 0),
            ("corrupt", self.corrupt_percent > 0),
        ]
        .into_iter()
        .filter_map(|(name, active)| active.then_some(name))
        .collect();
        if active.len() > 1 {
            return Err(CompileError::tc(format!(
                "only one of rate, drop, delay and corrupt can be set per interface, got {}",
                active.join(", ")
            )));
        }

        Ok(())
    }
}

/// What a service wants on one of its interfaces
///
/// Anything left unset is emitted as `none`. A binding without an address makes the service
/// ask for one over DHCP.
#[derive(Clone, Debug, Default, Builder)]
pub struct BindingOptions {
    /// The subnet of the interface, for interfaces created without one
    pub cidr: Option<Ipv4Cidr>,
    pub address: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub mtu: Option<u16>,
    pub tc: Option<TcRule>,
    #[builder(default)]
    pub firewall: FirewallPolicy,
    /// Routers only
    #[builder(default)]
    pub nat: NatPolicy,
    /// Routing cost advertised for the interface (routers only)
    pub cost: Option<u32>,
    /// First address handed out (DHCP servers only)
    pub lease_start: Option<Ipv4Addr>,
    /// Last address handed out (DHCP servers only)
    pub lease_end: Option<Ipv4Addr>,
}

/// A validated (service, interface) pair
#[derive(Clone, Debug)]
pub struct Binding {
    pub(crate) iface: IfaceId,
    pub(crate) cidr: Option<Ipv4Cidr>,
    pub(crate) address: Option<Ipv4Addr>,
    pub(crate) gateway: Option<Ipv4Addr>,
    pub(crate) mtu: Option<u16>,
    pub(crate) tc: Option<TcRule>,
    pub(crate) firewall: FirewallPolicy,
    pub(crate) nat: NatPolicy,
    pub(crate) cost: Option<u32>,
    pub(crate) lease: Option<(Ipv4Addr, Ipv4Addr)>,
}

impl Binding {
    /// Validates `options` for a service of the given kind attached to `iface`
    pub(crate) fn new(
        service: &str,
        kind: ServiceKind,
        iface: &NetworkInterface,
        options: BindingOptions,
    ) -> Result<Self, CompileError> {
        let cidr = match (iface.cidr, options.cidr) {
            (Some(iface_cidr), Some(binding_cidr)) if iface_cidr != binding_cidr => {
                return Err(CompileError::CidrMismatch {
                    service: service.to_string(),
                    iface: iface.name.clone(),
                    iface_cidr: iface_cidr.to_string(),
                    binding_cidr: binding_cidr.to_string(),
                });
            }
            (iface_cidr, binding_cidr) => iface_cidr.or(binding_cidr),
        };

        let check_in_range = |address: Ipv4Addr| match cidr {
            Some(cidr) if !cidr.contains(address) => Err(CompileError::AddressOutOfRange {
                service: service.to_string(),
                iface: iface.name.clone(),
                address,
                cidr: cidr.to_string(),
            }),
            _ => Ok(()),
        };

        if let Some(address) = options.address {
            check_in_range(address)?;
        }
        if let Some(gateway) = options.gateway {
            check_in_range(gateway)?;
        }

        if let Some(mtu) = options.mtu {
            if mtu < MIN_MTU {
                return Err(CompileError::limit(
                    service,
                    "mtu",
                    format!("must be at least {MIN_MTU}, got {mtu}"),
                ));
            }
        }

        if let Some(tc) = &options.tc {
            tc.validate()?;
        }

        let unsupported = |option| CompileError::UnsupportedBindingOption {
            service: service.to_string(),
            option,
        };

        if options.nat != NatPolicy::None {
            if kind != ServiceKind::Router {
                return Err(unsupported("nat"));
            }
            if cidr.is_none() {
                return Err(CompileError::MissingCidrForNat {
                    service: service.to_string(),
                    iface: iface.name.clone(),
                });
            }
        }

        if options.cost.is_some() && kind != ServiceKind::Router {
            return Err(unsupported("cost"));
        }

        let lease = match kind {
            ServiceKind::Dhcp => {
                let lease = lease_window(service, &iface.name, cidr, &options)?;
                check_in_range(lease.0)?;
                check_in_range(lease.1)?;
                Some(lease)
            }
            _ if options.lease_start.is_some() || options.lease_end.is_some() => {
                return Err(unsupported("lease"));
            }
            _ => None,
        };

        Ok(Self {
            iface: iface.id,
            cidr,
            address: options.address,
            gateway: options.gateway,
            mtu: options.mtu,
            tc: options.tc,
            firewall: options.firewall,
            nat: options.nat,
            cost: options.cost,
            lease,
        })
    }

    pub fn iface(&self) -> IfaceId {
        self.iface
    }

    pub fn cidr(&self) -> Option<Ipv4Cidr> {
        self.cidr
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    pub fn lease(&self) -> Option<(Ipv4Addr, Ipv4Addr)> {
        self.lease
    }
}

fn lease_window(
    service: &str,
    iface: &str,
    cidr: Option<Ipv4Cidr>,
    options: &BindingOptions,
) -> Result<(Ipv4Addr, Ipv4Addr), CompileError> {
    let invalid = |reason: String| CompileError::InvalidLeaseRange {
        service: service.to_string(),
        iface: iface.to_string(),
        reason,
    };

    let (start, end) = match (options.lease_start, options.lease_end) {
        (Some(start), Some(end)) => (start, end),
        (None, None) => {
            let Some(cidr) = cidr else {
                return Err(CompileError::MissingCidrForLease {
                    service: service.to_string(),
                    iface: iface.to_string(),
                });
            };
            cidr.default_lease_window()?
        }
        _ => {
            return Err(invalid(
                "lease start and lease end must be configured together".to_string(),
            ));
        }
    };

    if start > end {
        return Err(invalid(format!("lease start {start} is after lease end {end}")));
    }

    Ok((start, end))
}
