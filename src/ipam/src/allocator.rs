use std::{fmt, net::IpAddr, sync::Arc};

use tokio::sync::Mutex;

use super::{
    error::Error,
    ledger::Ledger,
    range::{addr_to_u128, checksum, u128_to_addr, Range, RangeSet, RangeSpec},
    store::Store,
};

/// Address handed out to an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfig {
    pub address: IpAddr,
    pub mask: IpAddr,
    pub prefix_len: u8,
    pub gateway: Option<IpAddr>,
}

impl IpConfig {
    fn new(address: IpAddr, range: &Range) -> IpConfig {
        IpConfig {
            address,
            mask: range.subnet.netmask(),
            prefix_len: range.subnet.prefix_len(),
            gateway: range.gateway,
        }
    }
}

/// Issues addresses of one pool.
/// Calls on the same allocator are serialized; the store guards against other writers.
pub struct Allocator {
    name: String,
    ranges: RangeSet,
    checksum: String,
    store: Arc<dyn Store>,
    lock: Mutex<()>,
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("name", &self.name)
            .field("ranges", &self.ranges)
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl Allocator {
    pub fn new(name: &str, specs: &[RangeSpec], store: Arc<dyn Store>) -> Result<Allocator, Error> {
        let ranges = RangeSet::new(specs)?;
        Ok(Allocator {
            name: name.to_string(),
            ranges,
            checksum: checksum(specs),
            store,
            lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn ranges(&self) -> &RangeSet {
        &self.ranges
    }

    pub fn total(&self) -> u128 {
        self.ranges.total()
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.ranges.contains(addr)
    }

    /// Allocates an address for `owner`, preferring the one it held last.
    #[tracing::instrument(skip(self), fields(pool = %self.name))]
    pub async fn get(&self, owner: &str) -> Result<IpConfig, Error> {
        let _guard = self.lock.lock().await;
        let ledger = self.store.load().await?;
        let preferred = ledger
            .history_of(owner)
            .filter(|addr| self.ranges.contains(addr));
        self.allocate(owner, preferred, &ledger).await
    }

    /// Allocates `requested` for `owner`, or any free address when it is None.
    #[tracing::instrument(skip(self), fields(pool = %self.name))]
    pub async fn get_with(&self, owner: &str, requested: Option<IpAddr>) -> Result<IpConfig, Error> {
        let _guard = self.lock.lock().await;
        let ledger = self.store.load().await?;
        match requested {
            Some(addr) => self.reserve_requested(owner, addr).await,
            None => self.allocate(owner, None, &ledger).await,
        }
    }

    pub async fn release(&self, owner: &str) -> Result<Vec<String>, Error> {
        let _guard = self.lock.lock().await;
        let released = self.store.release_by_owner(owner).await?;
        if !released.is_empty() {
            tracing::info!(pool = %self.name, owner, ?released, "Release addresses");
        }
        Ok(released)
    }

    pub async fn release_address(&self, addr: &IpAddr) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        self.store.release(addr).await?;
        tracing::info!(pool = %self.name, address = %addr, "Release address");
        Ok(())
    }

    async fn allocate(
        &self,
        owner: &str,
        preferred: Option<IpAddr>,
        ledger: &Ledger,
    ) -> Result<IpConfig, Error> {
        // the ledger already names this owner, hand the same address out again
        if let Some((addr, range)) = ledger
            .list_by_owner(owner)
            .into_iter()
            .find_map(|a| self.ranges.range_for(&a).map(|r| (a, r)))
        {
            tracing::debug!(pool = %self.name, owner, address = %addr, "Address is already allocated");
            return Ok(IpConfig::new(addr, range));
        }

        if let Some(addr) = preferred {
            // a historical address taken by someone else is skipped, not an error
            if ledger.owner_of(&addr).is_none() {
                return self.reserve_requested(owner, addr).await;
            }
        }

        for (addr, range) in self.candidates(ledger.last_reserved()) {
            if range.is_gateway(&addr) || ledger.owner_of(&addr).is_some() {
                continue;
            }
            if self.store.reserve(owner, &addr).await? {
                tracing::info!(pool = %self.name, owner, address = %addr, "Allocate address");
                return Ok(IpConfig::new(addr, range));
            }
        }

        Err(Error::NoAvailableAddress(self.name.clone()))
    }

    async fn reserve_requested(&self, owner: &str, addr: IpAddr) -> Result<IpConfig, Error> {
        let range = self
            .ranges
            .range_for(&addr)
            .ok_or_else(|| Error::NotContains(addr.to_string()))?;
        if range.is_gateway(&addr) {
            return Err(Error::Gateway(addr.to_string()));
        }
        if !self.store.reserve(owner, &addr).await? {
            return Err(Error::RequestedAddressUnavailable(addr.to_string()));
        }
        tracing::info!(pool = %self.name, owner, address = %addr, "Allocate requested address");
        Ok(IpConfig::new(addr, range))
    }

    /// Walks every address of the range set once, starting right after `last`
    /// and wrapping around to the beginning.
    fn candidates(&self, last: Option<IpAddr>) -> impl Iterator<Item = (IpAddr, &Range)> + '_ {
        let ranges = self.ranges.ranges();
        let mut segments: Vec<(usize, u128, u128)> = Vec::new();

        let pivot = last.and_then(|addr| self.ranges.position(&addr).map(|idx| (idx, addr)));
        match pivot {
            Some((idx, addr)) => {
                let r = &ranges[idx];
                let v = addr_to_u128(&addr);
                let start = addr_to_u128(&r.start);
                let end = addr_to_u128(&r.end);
                if v < end {
                    segments.push((idx, v + 1, end));
                }
                for i in (idx + 1..ranges.len()).chain(0..idx) {
                    let r = &ranges[i];
                    segments.push((i, addr_to_u128(&r.start), addr_to_u128(&r.end)));
                }
                segments.push((idx, start, v));
            }
            None => {
                for (i, r) in ranges.iter().enumerate() {
                    segments.push((i, addr_to_u128(&r.start), addr_to_u128(&r.end)));
                }
            }
        }

        segments.into_iter().flat_map(move |(idx, from, to)| {
            let range = &ranges[idx];
            let is_v4 = range.start.is_ipv4();
            (from..=to).map(move |v| (u128_to_addr(v, is_v4), range))
        })
    }
}
