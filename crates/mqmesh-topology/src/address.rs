//! Address plan
//!
//! Each region takes two consecutive `/16`s out of `10.0.0.0/8`: region index
//! `i` gets `10.{1+2i}.0.0/16` for its internal network and `10.{2+2i}.0.0/16`
//! for its external network. Allocation is a pure function of the index.

use ipnetwork::Ipv4Network;
use mqmesh_common::{ConfigError, TopologyError, TopologyResult};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;

/// Largest region count the plan holds: bases run 1..=254
pub const MAX_REGIONS: usize = 127;

const BLOCK_PREFIX: u8 = 16;

/// A `/16` under `10.0.0.0/8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressBlock {
    base: u8,
    network: Ipv4Network,
}

impl AddressBlock {
    /// Block `10.{base}.0.0/16`
    pub fn from_base(base: u8) -> TopologyResult<Self> {
        let network = Ipv4Network::new(Ipv4Addr::new(10, base, 0, 0), BLOCK_PREFIX)
            .map_err(|e| TopologyError::invariant(format!("block 10.{base}.0.0/16: {e}")))?;
        Ok(Self { base, network })
    }

    /// Second octet
    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.network.contains(addr)
    }

    /// CIDR blocks overlap iff one contains the other's network address
    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        self.network.contains(other.network.network()) || other.network.contains(self.network.network())
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)
    }
}

impl Serialize for AddressBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A region's two blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionBlocks {
    pub internal: AddressBlock,
    pub external: AddressBlock,
}

impl RegionBlocks {
    pub fn overlaps(&self, other: &RegionBlocks) -> bool {
        [self.internal, self.external]
            .iter()
            .any(|a| [other.internal, other.external].iter().any(|b| a.overlaps(b)))
    }
}

/// Issues region blocks
pub struct AddressSpaceAllocator;

impl AddressSpaceAllocator {
    /// Blocks for the region at 0-based `index`
    pub fn blocks_for(index: usize) -> TopologyResult<RegionBlocks> {
        if index >= MAX_REGIONS {
            return Err(ConfigError::TooManyRegions {
                requested: index + 1,
                max: MAX_REGIONS,
            }
            .into());
        }
        // index < 127, so both bases fit in 1..=254
        let internal = (1 + 2 * index) as u8;
        Ok(RegionBlocks {
            internal: AddressBlock::from_base(internal)?,
            external: AddressBlock::from_base(internal + 1)?,
        })
    }

    /// Blocks for `region_count` regions, in region order
    pub fn allocate(region_count: usize) -> TopologyResult<Vec<RegionBlocks>> {
        if region_count == 0 {
            return Err(ConfigError::NoRegions.into());
        }
        if region_count > MAX_REGIONS {
            return Err(ConfigError::TooManyRegions {
                requested: region_count,
                max: MAX_REGIONS,
            }
            .into());
        }
        (0..region_count).map(Self::blocks_for).collect()
    }
}

/// Fail unless every block is disjoint from every other
pub fn ensure_disjoint(blocks: &[AddressBlock]) -> TopologyResult<()> {
    for (i, a) in blocks.iter().enumerate() {
        if let Some(b) = blocks[i + 1..].iter().find(|b| a.overlaps(b)) {
            return Err(TopologyError::invariant(format!("address blocks {a} and {b} overlap")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_three_regions() {
        let blocks = AddressSpaceAllocator::allocate(3).unwrap();
        let rendered: Vec<(String, String)> = blocks
            .iter()
            .map(|b| (b.internal.to_string(), b.external.to_string()))
            .collect();

        assert_eq!(
            rendered,
            vec![
                ("10.1.0.0/16".to_string(), "10.2.0.0/16".to_string()),
                ("10.3.0.0/16".to_string(), "10.4.0.0/16".to_string()),
                ("10.5.0.0/16".to_string(), "10.6.0.0/16".to_string()),
            ]
        );
    }

    #[test]
    fn test_limits() {
        assert!(matches!(
            AddressSpaceAllocator::allocate(0),
            Err(TopologyError::Config(ConfigError::NoRegions))
        ));
        assert!(matches!(
            AddressSpaceAllocator::allocate(128),
            Err(TopologyError::Config(ConfigError::TooManyRegions { requested: 128, max: 127 }))
        ));

        let last = AddressSpaceAllocator::allocate(127).unwrap().pop().unwrap();
        assert_eq!(last.internal.base(), 253);
        assert_eq!(last.external.base(), 254);
    }

    #[test]
    fn test_overlap_detected() {
        let a = AddressBlock::from_base(3).unwrap();
        let b = AddressBlock::from_base(3).unwrap();
        let c = AddressBlock::from_base(4).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));

        let err = ensure_disjoint(&[a, c, b]).unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn test_block_contains_host() {
        let block = AddressBlock::from_base(3).unwrap();
        assert!(block.contains(Ipv4Addr::new(10, 3, 0, 4)));
        assert!(!block.contains(Ipv4Addr::new(10, 4, 0, 4)));
    }

    proptest! {
        #[test]
        fn prop_blocks_disjoint_and_deterministic(n in 1usize..=MAX_REGIONS) {
            let first = AddressSpaceAllocator::allocate(n).unwrap();
            let second = AddressSpaceAllocator::allocate(n).unwrap();
            prop_assert_eq!(&first, &second);

            let flat: Vec<AddressBlock> = first.iter().flat_map(|b| [b.internal, b.external]).collect();
            prop_assert_eq!(flat.len(), 2 * n);
            prop_assert!(ensure_disjoint(&flat).is_ok());

            let top = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
            for block in &flat {
                prop_assert!(top.contains(block.network().network()));
                prop_assert_eq!(block.network().prefix(), 16);
            }
        }
    }
}
