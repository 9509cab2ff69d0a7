//! IPv4 addresses, CIDR blocks and their public/private visibility

use crate::error::CompileError;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// The canonical private ranges, in the order they are checked
pub const PRIVATE_RANGES: [(Ipv4Addr, u8); 4] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
];

/// The longest prefix that still leaves room for a default DHCP lease window
pub const MAX_LEASE_PREFIX_LEN: u8 = 28;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// Parses an address in dotted-quad notation
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr, CompileError> {
    text.parse().map_err(|_| CompileError::InvalidAddress {
        text: text.to_string(),
    })
}

/// Returns the netmask with the `prefix_len` high bits set
pub fn netmask(prefix_len: u8) -> Ipv4Addr {
    Ipv4Addr::from_bits(netmask_bits(prefix_len))
}

fn netmask_bits(prefix_len: u8) -> u32 {
    u32::MAX
        .checked_shl(32 - u32::from(prefix_len.min(32)))
        .unwrap_or(0)
}

/// Derives the netmask and visibility of a block
///
/// A block that matches a private range while being wider than it would claim public
/// addresses over private ones, so it is rejected.
pub fn classify_cidr(
    address: Ipv4Addr,
    prefix_len: u8,
) -> Result<(Ipv4Addr, Visibility), CompileError> {
    if prefix_len > 32 {
        return Err(CompileError::InvalidPrefix {
            cidr: format!("{address}/{prefix_len}"),
            reason: "the prefix length cannot be higher than 32".to_string(),
        });
    }

    for (private, private_prefix_len) in PRIVATE_RANGES {
        let mask = netmask_bits(prefix_len.min(private_prefix_len));
        if address.to_bits() & mask != private.to_bits() & mask {
            continue;
        }

        if prefix_len < private_prefix_len {
            return Err(CompileError::OverlapViolation {
                cidr: format!("{address}/{prefix_len}"),
                private: format!("{private}/{private_prefix_len}"),
            });
        }

        return Ok((netmask(prefix_len), Visibility::Private));
    }

    Ok((netmask(prefix_len), Visibility::Public))
}

/// An IPv4 block in CIDR notation, with its visibility already classified
///
/// Host bits are cleared on construction, so `10.0.0.5/24` and `10.0.0.0/24` are the same block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    address: Ipv4Addr,
    prefix_len: u8,
    visibility: Visibility,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, CompileError> {
        let (netmask, visibility) = classify_cidr(address, prefix_len)?;
        Ok(Self {
            address: Ipv4Addr::from_bits(address.to_bits() & netmask.to_bits()),
            prefix_len,
            visibility,
        })
    }

    /// Builds a block that lies inside one of the [`PRIVATE_RANGES`] without checking it
    pub(crate) const fn known_private(address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
            visibility: Visibility::Private,
        }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn netmask(&self) -> Ipv4Addr {
        netmask(self.prefix_len)
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// The number of addresses covered by the block
    pub fn size(&self) -> u64 {
        1 << (32 - u32::from(self.prefix_len))
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.address.to_bits() & netmask_bits(self.prefix_len))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.address.to_bits() | !netmask_bits(self.prefix_len))
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let mask = netmask_bits(self.prefix_len);
        address.to_bits() & mask == self.address.to_bits() & mask
    }

    /// The lease window handed out when a DHCP server does not configure one: from the
    /// tenth address of the network up to the last host address
    pub fn default_lease_window(&self) -> Result<(Ipv4Addr, Ipv4Addr), CompileError> {
        if self.prefix_len > MAX_LEASE_PREFIX_LEN {
            return Err(CompileError::InvalidPrefix {
                cidr: self.to_string(),
                reason: format!(
                    "a default lease range requires a prefix length of at most {MAX_LEASE_PREFIX_LEN}"
                ),
            });
        }

        let start = Ipv4Addr::from_bits(self.network().to_bits() + 10);
        let end = Ipv4Addr::from_bits(self.broadcast().to_bits() - 1);
        Ok((start, end))
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((address, prefix_len)) = s.split_once('/') else {
            return Err(CompileError::InvalidPrefix {
                cidr: s.to_string(),
                reason: "missing `/` separator".to_string(),
            });
        };

        let address = parse_ipv4(address)?;
        let prefix_len: u8 = prefix_len.parse().map_err(|_| CompileError::InvalidPrefix {
            cidr: s.to_string(),
            reason: "the prefix length is not a valid unsigned integer".to_string(),
        })?;

        Self::new(address, prefix_len)
    }
}
