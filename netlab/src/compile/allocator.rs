use crate::address::Ipv4Cidr;
use crate::error::CompileError;
use std::net::Ipv4Addr;

/// Hands out consecutive subnets of a fixed size from a pool
///
/// Docker only creates a limited number of networks unless each of them is given an explicit
/// subnet. The subnets handed out here only exist to lift that limit, services never use them.
#[derive(Debug)]
pub struct SubnetAllocator {
    pool: Ipv4Cidr,
    prefix_len: u8,
    cursor: u64,
    ceiling: u64,
}

impl SubnetAllocator {
    pub fn new(pool: Ipv4Cidr, prefix_len: u8) -> Result<Self, CompileError> {
        if prefix_len > 32 || prefix_len < pool.prefix_len() {
            return Err(CompileError::InvalidPrefix {
                cidr: format!("{pool} /{prefix_len}"),
                reason: format!(
                    "the allocation prefix length must lie between {} and 32",
                    pool.prefix_len()
                ),
            });
        }

        let cursor = u64::from(pool.network().to_bits());
        Ok(Self {
            pool,
            prefix_len,
            cursor,
            ceiling: cursor + pool.size(),
        })
    }

    pub fn next(&mut self) -> Result<Ipv4Cidr, CompileError> {
        let step = 1u64 << (32 - u32::from(self.prefix_len));
        let next = self.cursor + step;
        if self.cursor >= self.ceiling || next > self.ceiling {
            return Err(CompileError::PoolExhausted {
                pool: self.pool.to_string(),
            });
        }

        // The cursor stays below the ceiling, which is at most 2^32
        let address = Ipv4Addr::from_bits(self.cursor as u32);
        let subnet = Ipv4Cidr::new(address, self.prefix_len)?;
        self.cursor = next;
        Ok(subnet)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exhaust_pool() {
        let mut allocator = SubnetAllocator::new("10.0.0.0/22".parse().unwrap(), 24).unwrap();
        let subnets: Vec<_> = (0..4)
            .map(|_| allocator.next().unwrap().to_string())
            .collect();
        assert_eq!(
            subnets,
            ["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24", "10.0.3.0/24"]
        );

        assert_eq!(
            allocator.next(),
            Err(CompileError::PoolExhausted {
                pool: "10.0.0.0/22".to_string()
            })
        );
        assert!(allocator.next().is_err());
    }

    #[test]
    fn test_default_pool() {
        let mut allocator = SubnetAllocator::new("10.0.0.0/8".parse().unwrap(), 22).unwrap();
        assert_eq!(allocator.next().unwrap().to_string(), "10.0.0.0/22");
        assert_eq!(allocator.next().unwrap().to_string(), "10.0.4.0/22");
        assert_eq!(allocator.next().unwrap().to_string(), "10.0.8.0/22");
    }

    #[test]
    fn test_pool_up_to_the_last_address() {
        let mut allocator = SubnetAllocator::new("255.255.255.0/24".parse().unwrap(), 25).unwrap();
        assert_eq!(allocator.next().unwrap().to_string(), "255.255.255.0/25");
        assert_eq!(allocator.next().unwrap().to_string(), "255.255.255.128/25");
        assert!(matches!(
            allocator.next(),
            Err(CompileError::PoolExhausted { .. })
        ));
    }

    #[test]
    fn test_invalid_prefix_len() {
        let pool: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        assert!(SubnetAllocator::new(pool, 8).is_err());
        assert!(SubnetAllocator::new(pool, 33).is_err());
        assert!(SubnetAllocator::new(pool, 16).is_ok());
    }
}
