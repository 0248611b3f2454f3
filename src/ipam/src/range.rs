use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use ipnet::IpNet;
use sha2::{Digest, Sha256};

use super::error::Error;

/// One range as it is written in a pool spec.
/// Empty or absent bounds are filled with the subnet defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    pub subnet: String,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
    pub gateway: Option<String>,
}

impl RangeSpec {
    pub fn new(subnet: &str) -> RangeSpec {
        RangeSpec {
            subnet: subnet.to_string(),
            ..Default::default()
        }
    }

    pub fn with_bounds(mut self, start: &str, end: &str) -> RangeSpec {
        self.range_start = Some(start.to_string());
        self.range_end = Some(end.to_string());
        self
    }

    pub fn with_gateway(mut self, gateway: &str) -> RangeSpec {
        self.gateway = Some(gateway.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: IpAddr,
    pub end: IpAddr,
    pub subnet: IpNet,
    pub gateway: Option<IpAddr>,
}

impl Range {
    pub fn new(spec: &RangeSpec) -> Result<Range, Error> {
        let parsed =
            IpNet::from_str(&spec.subnet).map_err(|_| Error::InvalidCIDR(spec.subnet.clone()))?;
        let subnet = parsed.trunc();

        if is_single_host(&subnet) {
            // A host route is a range of exactly one address without a gateway.
            let addr = parsed.addr();
            return Ok(Range {
                start: addr,
                end: addr,
                subnet,
                gateway: None,
            });
        }

        let network = addr_to_u128(&subnet.network());
        let last = addr_to_u128(&subnet.broadcast());
        let is_v4 = subnet.network().is_ipv4();

        let default_start = u128_to_addr(network + 1, is_v4);
        let default_end = if is_v4 {
            u128_to_addr(last - 1, is_v4)
        } else {
            u128_to_addr(last, is_v4)
        };

        let mut start = match non_empty(&spec.range_start) {
            Some(s) => parse_bound(s, &subnet)?,
            None => default_start,
        };
        let mut end = match non_empty(&spec.range_end) {
            Some(s) => parse_bound(s, &subnet)?,
            None => default_end,
        };
        if addr_to_u128(&start) > addr_to_u128(&end) {
            std::mem::swap(&mut start, &mut end);
        }

        let gateway = match non_empty(&spec.gateway) {
            Some(s) => Some(parse_bound(s, &subnet)?),
            None => Some(default_start),
        };

        Ok(Range {
            start,
            end,
            subnet,
            gateway,
        })
    }

    /// Number of allocatable addresses, the gateway excluded.
    pub fn count(&self) -> u128 {
        let size = addr_to_u128(&self.end) - addr_to_u128(&self.start) + 1;
        match self.gateway {
            Some(gw) if self.contains(&gw) => size - 1,
            _ => size,
        }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        if !same_family(addr, &self.start) {
            return false;
        }
        let v = addr_to_u128(addr);
        addr_to_u128(&self.start) <= v && v <= addr_to_u128(&self.end)
    }

    pub fn overlaps(&self, other: &Range) -> bool {
        if !same_family(&self.start, &other.start) {
            return false;
        }
        !(addr_to_u128(&self.end) < addr_to_u128(&other.start)
            || addr_to_u128(&other.end) < addr_to_u128(&self.start))
    }

    pub fn is_gateway(&self, addr: &IpAddr) -> bool {
        self.gateway.as_ref() == Some(addr)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet(Vec<Range>);

impl RangeSet {
    pub fn new(specs: &[RangeSpec]) -> Result<RangeSet, Error> {
        if specs.is_empty() {
            return Err(Error::EmptyRanges);
        }
        let ranges = specs.iter().map(Range::new).collect::<Result<Vec<_>, _>>()?;
        Ok(RangeSet(ranges))
    }

    pub fn ranges(&self) -> &[Range] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.range_for(addr).is_some()
    }

    pub fn range_for(&self, addr: &IpAddr) -> Option<&Range> {
        self.0.iter().find(|r| r.contains(addr))
    }

    pub fn position(&self, addr: &IpAddr) -> Option<usize> {
        self.0.iter().position(|r| r.contains(addr))
    }

    pub fn total(&self) -> u128 {
        self.0.iter().map(|r| r.count()).sum()
    }

    /// Whether any range of `self` intersects any range of `other`.
    pub fn overlaps(&self, other: &RangeSet) -> bool {
        self.0
            .iter()
            .any(|a| other.0.iter().any(|b| a.overlaps(b)))
    }

    /// Returns the first pair of indices whose ranges intersect each other.
    pub fn self_overlap(&self) -> Option<(usize, usize)> {
        for (i, a) in self.0.iter().enumerate() {
            for (j, b) in self.0.iter().enumerate().skip(i + 1) {
                if a.overlaps(b) {
                    return Some((i, j));
                }
            }
        }
        None
    }
}

/// Stable fingerprint of a list of range specs.
/// The allocator of a pool is rebuilt whenever this value changes.
pub fn checksum(specs: &[RangeSpec]) -> String {
    let mut hasher = Sha256::new();
    for spec in specs.iter() {
        hasher.update(spec.subnet.as_bytes());
        hasher.update(b"|");
        hasher.update(spec.range_start.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(spec.range_end.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(spec.gateway.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}

pub fn addr_to_u128(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from(*a) as u128,
        IpAddr::V6(a) => u128::from(*a),
    }
}

pub fn u128_to_addr(value: u128, is_v4: bool) -> IpAddr {
    if is_v4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

pub fn same_family(a: &IpAddr, b: &IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

fn is_single_host(subnet: &IpNet) -> bool {
    subnet.prefix_len() == subnet.max_prefix_len()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn parse_bound(value: &str, subnet: &IpNet) -> Result<IpAddr, Error> {
    let addr = IpAddr::from_str(value).map_err(|_| Error::InvalidAddress(value.to_string()))?;
    if !same_family(&addr, &subnet.network()) {
        return Err(Error::ProtocolMismatch);
    }
    if !subnet.contains(&addr) {
        return Err(Error::OutOfSubnet {
            addr: value.to_string(),
            subnet: subnet.to_string(),
        });
    }
    // /31 and /127 have no distinct network or broadcast address.
    if subnet.prefix_len() + 1 < subnet.max_prefix_len() {
        let broadcast = subnet.network().is_ipv4() && addr == subnet.broadcast();
        if addr == subnet.network() || broadcast {
            return Err(Error::ReservedAddress(value.to_string()));
        }
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn ip(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    #[rstest(
        spec,
        start,
        end,
        gateway,
        case(RangeSpec::new("192.168.100.0/24"), "192.168.100.1", "192.168.100.254", Some("192.168.100.1")),
        case(RangeSpec::new("10.0.0.5/24"), "10.0.0.1", "10.0.0.254", Some("10.0.0.1")),
        case(RangeSpec::new("192.168.0.10/32"), "192.168.0.10", "192.168.0.10", None),
        case(RangeSpec::new("2001:db8::/120"), "2001:db8::1", "2001:db8::ff", Some("2001:db8::1")),
        case(RangeSpec::new("2001:db8::8/128"), "2001:db8::8", "2001:db8::8", None),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.100", "10.0.0.10"), "10.0.0.10", "10.0.0.100", Some("10.0.0.1")),
        case(RangeSpec::new("10.0.0.0/24").with_gateway("10.0.0.254"), "10.0.0.1", "10.0.0.254", Some("10.0.0.254")),
    )]
    fn works_range_new(spec: RangeSpec, start: &str, end: &str, gateway: Option<&str>) {
        let r = Range::new(&spec).unwrap();
        assert_eq!(ip(start), r.start);
        assert_eq!(ip(end), r.end);
        assert_eq!(gateway.map(ip), r.gateway);
    }

    #[rstest(
        spec,
        expected,
        case(RangeSpec::new("10.0.0/24"), Error::InvalidCIDR("10.0.0/24".to_string())),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.x", "10.0.0.10"), Error::InvalidAddress("10.0.0.x".to_string())),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("10.0.1.1", "10.0.0.10"), Error::OutOfSubnet{ addr: "10.0.1.1".to_string(), subnet: "10.0.0.0/24".to_string() }),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.0", "10.0.0.10"), Error::ReservedAddress("10.0.0.0".to_string())),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.1", "10.0.0.255"), Error::ReservedAddress("10.0.0.255".to_string())),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("2001:db8::1", "10.0.0.10"), Error::ProtocolMismatch),
    )]
    fn fails_range_new(spec: RangeSpec, expected: Error) {
        assert_eq!(Err(expected), Range::new(&spec));
    }

    #[rstest(
        spec,
        expected,
        case(RangeSpec::new("192.168.100.0/24"), 253),
        case(RangeSpec::new("192.168.100.0/24").with_bounds("192.168.100.10", "192.168.100.19"), 10),
        case(RangeSpec::new("192.168.100.0/24").with_bounds("192.168.100.1", "192.168.100.10"), 9),
        case(RangeSpec::new("192.168.0.10/32"), 1),
        case(RangeSpec::new("2001:db8::/120"), 254),
    )]
    fn works_range_count(spec: RangeSpec, expected: u128) {
        assert_eq!(expected, Range::new(&spec).unwrap().count());
    }

    #[rstest(
        a,
        b,
        expected,
        case(RangeSpec::new("10.0.0.0/24"), RangeSpec::new("10.0.0.0/25"), true),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.10", "10.0.0.20"), RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.21", "10.0.0.30"), false),
        case(RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.10", "10.0.0.20"), RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.20", "10.0.0.30"), true),
        case(RangeSpec::new("10.0.0.0/24"), RangeSpec::new("10.0.1.0/24"), false),
        case(RangeSpec::new("10.0.0.0/24"), RangeSpec::new("10.0.0.7/32"), true),
        case(RangeSpec::new("10.0.0.0/24"), RangeSpec::new("2001:db8::/120"), false),
    )]
    fn works_range_overlaps(a: RangeSpec, b: RangeSpec, expected: bool) {
        let a = Range::new(&a).unwrap();
        let b = Range::new(&b).unwrap();
        assert_eq!(expected, a.overlaps(&b));
        assert_eq!(expected, b.overlaps(&a));
    }

    #[test]
    fn works_range_set() {
        let set = RangeSet::new(&[
            RangeSpec::new("10.0.0.0/24").with_bounds("10.0.0.10", "10.0.0.19"),
            RangeSpec::new("10.0.1.0/24").with_bounds("10.0.1.10", "10.0.1.19"),
        ])
        .unwrap();
        assert_eq!(20, set.total());
        assert!(set.contains(&ip("10.0.1.15")));
        assert!(!set.contains(&ip("10.0.0.20")));
        assert_eq!(Some(1), set.position(&ip("10.0.1.10")));
        assert_eq!(None, set.self_overlap());

        assert_eq!(Err(Error::EmptyRanges), RangeSet::new(&[]));
    }

    #[test]
    fn works_range_set_self_overlap() {
        let set = RangeSet::new(&[
            RangeSpec::new("10.0.0.0/24"),
            RangeSpec::new("10.0.1.0/24"),
            RangeSpec::new("10.0.0.128/25"),
        ])
        .unwrap();
        assert_eq!(Some((0, 2)), set.self_overlap());
    }

    #[test]
    fn works_checksum() {
        let a = [RangeSpec::new("10.0.0.0/24")];
        let b = [RangeSpec::new("10.0.0.0/24").with_gateway("10.0.0.254")];
        assert_eq!(checksum(&a), checksum(&a.clone()));
        assert_ne!(checksum(&a), checksum(&b));
        assert_eq!(64, checksum(&a).len());
    }
}
