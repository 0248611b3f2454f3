use std::{collections::BTreeMap, net::IpAddr, str::FromStr};

/// Persisted allocation state of a single pool.
///
/// `allocated` maps an address to its owner, `allocated_history` keeps the last owner
/// of released addresses so that a returning owner can get the same address back.
/// `version` is the opaque revision of the record the ledger was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub version: Option<String>,
    pub total: i64,
    pub available: i64,
    pub last_allocated: Option<String>,
    pub allocated: BTreeMap<String, String>,
    pub allocated_history: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    AlreadyHeld,
    Taken,
}

impl Reservation {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Reservation::Taken)
    }
}

impl Ledger {
    pub fn owner_of(&self, addr: &IpAddr) -> Option<&str> {
        self.allocated.get(&addr.to_string()).map(|s| s.as_str())
    }

    pub fn reserve(&mut self, owner: &str, addr: &IpAddr) -> Reservation {
        let key = addr.to_string();
        match self.allocated.get(&key) {
            Some(o) if o == owner => return Reservation::AlreadyHeld,
            Some(_) => return Reservation::Taken,
            None => {}
        }
        self.allocated_history.remove(&key);
        self.allocated.insert(key.clone(), owner.to_string());
        self.last_allocated = Some(key);
        self.available -= 1;
        Reservation::Reserved
    }

    /// Moves the record of `addr` into the history.
    /// Returns false when nothing was recorded for it.
    pub fn release(&mut self, addr: &IpAddr) -> bool {
        let key = addr.to_string();
        match self.allocated.remove(&key) {
            Some(owner) => {
                self.allocated_history.insert(key, owner);
                self.available += 1;
                true
            }
            None => false,
        }
    }

    pub fn release_by_owner(&mut self, owner: &str) -> Vec<String> {
        let released: Vec<String> = self
            .allocated
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .map(|(addr, _)| addr.clone())
            .collect();
        for addr in released.iter() {
            if let Some(o) = self.allocated.remove(addr) {
                self.allocated_history.insert(addr.clone(), o);
                self.available += 1;
            }
        }
        released
    }

    pub fn list_by_owner(&self, owner: &str) -> Vec<IpAddr> {
        self.allocated
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .filter_map(|(addr, _)| IpAddr::from_str(addr).ok())
            .collect()
    }

    /// The address `owner` held most recently before releasing it.
    pub fn history_of(&self, owner: &str) -> Option<IpAddr> {
        self.allocated_history
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .find_map(|(addr, _)| IpAddr::from_str(addr).ok())
    }

    pub fn last_reserved(&self) -> Option<IpAddr> {
        self.last_allocated
            .as_deref()
            .and_then(|s| IpAddr::from_str(s).ok())
    }

    /// Drops history entries for addresses `keep` rejects.
    /// Returns true if something was dropped.
    pub fn retain_history<F>(&mut self, keep: F) -> bool
    where
        F: Fn(&IpAddr) -> bool,
    {
        let before = self.allocated_history.len();
        self.allocated_history.retain(|addr, _| match IpAddr::from_str(addr) {
            Ok(a) => keep(&a),
            Err(_) => false,
        });
        before != self.allocated_history.len()
    }
}
