use std::net::Ipv4Addr;
use thiserror::Error;

/// Everything that can go wrong while building or compiling a topology
///
/// All variants are fatal for the compilation except [`CompileError::HostConfigUnreadable`],
/// which callers are expected to recover from by falling back to a default kernel frequency.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("illegal IPv4 address `{text}`")]
    InvalidAddress { text: String },
    #[error("illegal prefix in `{cidr}`: {reason}")]
    InvalidPrefix { cidr: String, reason: String },
    #[error("public subnet `{cidr}` overlaps private subnet `{private}`")]
    OverlapViolation { cidr: String, private: String },
    #[error("{service}: address {address} is outside of `{cidr}` (interface `{iface}`)")]
    AddressOutOfRange {
        service: String,
        iface: String,
        address: Ipv4Addr,
        cidr: String,
    },
    #[error("{service}: NAT on interface `{iface}` requires a CIDR")]
    MissingCidrForNat { service: String, iface: String },
    #[error("{service}: a DHCP lease range on interface `{iface}` requires a CIDR")]
    MissingCidrForLease { service: String, iface: String },
    #[error("{service}: invalid lease range on interface `{iface}`: {reason}")]
    InvalidLeaseRange {
        service: String,
        iface: String,
        reason: String,
    },
    #[error("{service}: a DHCP server can only be attached to a single interface")]
    MultipleDhcpInterfaces { service: String },
    #[error("{service}: interface `{iface}` is already attached")]
    DuplicateBinding { service: String, iface: String },
    #[error(
        "{service}: binding CIDR `{binding_cidr}` differs from the CIDR `{iface_cidr}` of interface `{iface}`"
    )]
    CidrMismatch {
        service: String,
        iface: String,
        iface_cidr: String,
        binding_cidr: String,
    },
    #[error("{service}: `{option}` is not supported by this kind of service")]
    UnsupportedBindingOption {
        service: String,
        option: &'static str,
    },
    #[error("invalid traffic control rule: {reason}")]
    InvalidTcRule { reason: String },
    #[error("{subject}: `{field}` {reason}")]
    ResourceLimitViolation {
        subject: String,
        field: &'static str,
        reason: String,
    },
    #[error("`{service}` is not a {expected}")]
    WrongServiceKind {
        service: String,
        expected: &'static str,
    },
    #[error("{entity} does not belong to this topology")]
    UnknownEntity { entity: String },
    #[error("allocated subnet `{pool}` exceeded, consider a bigger pool or a longer prefix length")]
    PoolExhausted { pool: String },
    #[error("unable to read the kernel HZ from `{path}`: {reason}")]
    HostConfigUnreadable { path: String, reason: String },
}

impl CompileError {
    pub(crate) fn limit(
        subject: impl Into<String>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::ResourceLimitViolation {
            subject: subject.into(),
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn tc(reason: impl Into<String>) -> Self {
        Self::InvalidTcRule {
            reason: reason.into(),
        }
    }
}
