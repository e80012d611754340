//! Route and freshness table
//!
//! One entry per destination the node has heard about. A missing entry is
//! the Unknown state; entries then move between Requesting, Active and
//! Invalid. Entries are only changed by fresher information: a strictly
//! fresher sequence number, or the same sequence number with a lower metric.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use hwmp_protocol::{MeshAddress, Metric, SeqNo};

use crate::scheduler::TimerHandle;

/// Lifecycle of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathState {
    /// Discovery issued, no usable path yet
    Requesting,
    /// Usable until `expires_at`
    Active,
    /// Broken by a PERR, a link failure or lifetime expiry
    Invalid,
}

/// Neighbor and interface used to reach a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHop {
    pub address: MeshAddress,
    pub interface: u32,
}

/// Information learned from a PREQ or PREP about one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteCandidate {
    pub destination: MeshAddress,
    pub seqno: SeqNo,
    pub next_hop: NextHop,
    pub metric: Metric,
    pub hop_count: u8,
    pub lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub destination: MeshAddress,
    /// Best known destination sequence number
    pub seqno: SeqNo,
    pub next_hop: Option<NextHop>,
    pub metric: Metric,
    pub hop_count: u8,
    pub state: PathState,
    pub expires_at: Duration,
    pub(crate) expiry: Option<TimerHandle>,
    /// Neighbors that reach `destination` through this node
    precursors: BTreeSet<(u32, MeshAddress)>,
}

impl RouteEntry {
    fn requesting(destination: MeshAddress, seqno: SeqNo) -> Self {
        RouteEntry {
            destination,
            seqno,
            next_hop: None,
            metric: Metric::MAX,
            hop_count: 0,
            state: PathState::Requesting,
            expires_at: Duration::ZERO,
            expiry: None,
            precursors: BTreeSet::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == PathState::Active
    }

    /// `(interface, neighbor)` pairs relying on this route
    pub fn precursors(&self) -> impl Iterator<Item = (u32, MeshAddress)> + '_ {
        self.precursors.iter().copied()
    }

    /// Whether `candidate` carries fresher information than this entry
    fn accepts(&self, candidate: &RouteCandidate) -> bool {
        match self.state {
            PathState::Requesting => !self.seqno.is_fresher_than(candidate.seqno),
            PathState::Active | PathState::Invalid => {
                candidate.seqno.is_fresher_than(self.seqno)
                    || (candidate.seqno == self.seqno && candidate.metric < self.metric)
            }
        }
    }
}

/// Route entry that was just invalidated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidated {
    pub destination: MeshAddress,
    pub seqno: SeqNo,
    pub precursors: Vec<(u32, MeshAddress)>,
    pub expiry: Option<TimerHandle>,
}

/// Per-destination freshness state
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<MeshAddress, RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, destination: &MeshAddress) -> Option<&RouteEntry> {
        self.routes.get(destination)
    }

    /// The entry for `destination` if it is Active
    pub fn active(&self, destination: &MeshAddress) -> Option<&RouteEntry> {
        self.routes.get(destination).filter(|entry| entry.is_active())
    }

    pub fn next_hop(&self, destination: &MeshAddress) -> Option<NextHop> {
        self.active(destination).and_then(|entry| entry.next_hop)
    }

    /// Move `destination` to Requesting unless it is Active.
    ///
    /// A known destination sequence number is kept if fresher than `seqno`.
    pub fn request(&mut self, destination: MeshAddress, seqno: SeqNo) -> PathState {
        let entry = self
            .routes
            .entry(destination)
            .or_insert_with(|| RouteEntry::requesting(destination, seqno));

        if !entry.is_active() {
            entry.state = PathState::Requesting;
            entry.seqno = entry.seqno.freshest(seqno);
        }
        entry.state
    }

    pub fn is_acceptable(&self, candidate: &RouteCandidate) -> bool {
        self.routes
            .get(&candidate.destination)
            .map_or(true, |entry| entry.accepts(candidate))
    }

    /// Install `candidate` as the Active path if it is acceptable.
    ///
    /// Returns the entry so the caller can replace its expiry timer.
    pub fn update(&mut self, candidate: RouteCandidate, now: Duration) -> Option<&mut RouteEntry> {
        if !self.is_acceptable(&candidate) {
            return None;
        }

        let entry = self
            .routes
            .entry(candidate.destination)
            .or_insert_with(|| RouteEntry::requesting(candidate.destination, candidate.seqno));

        entry.seqno = candidate.seqno;
        entry.next_hop = Some(candidate.next_hop);
        entry.metric = candidate.metric;
        entry.hop_count = candidate.hop_count;
        entry.state = PathState::Active;
        entry.expires_at = now + candidate.lifetime;
        Some(entry)
    }

    /// Invalidate an Active entry, recording `seqno` as its sequence number
    pub fn invalidate(&mut self, destination: &MeshAddress, seqno: SeqNo) -> Option<Invalidated> {
        let entry = self.routes.get_mut(destination).filter(|e| e.is_active())?;

        entry.state = PathState::Invalid;
        entry.seqno = seqno;
        entry.metric = Metric::MAX;
        Some(Invalidated {
            destination: *destination,
            seqno,
            precursors: std::mem::take(&mut entry.precursors).into_iter().collect(),
            expiry: entry.expiry.take(),
        })
    }

    /// Lifetime elapsed: Active entries past `expires_at` become Invalid
    pub fn expire(&mut self, destination: &MeshAddress, now: Duration) -> bool {
        match self.routes.get_mut(destination) {
            Some(entry) if entry.is_active() && now >= entry.expires_at => {
                entry.state = PathState::Invalid;
                entry.expiry = None;
                true
            }
            _ => false,
        }
    }

    /// Active destinations reached through `next_hop`
    pub fn via(&self, next_hop: NextHop) -> Vec<MeshAddress> {
        self.routes
            .values()
            .filter(|entry| entry.is_active() && entry.next_hop == Some(next_hop))
            .map(|entry| entry.destination)
            .collect()
    }

    pub fn add_precursor(&mut self, destination: &MeshAddress, interface: u32, neighbor: MeshAddress) {
        if let Some(entry) = self.routes.get_mut(destination) {
            entry.precursors.insert((interface, neighbor));
        }
    }

    /// Cancel bookkeeping for every expiry timer, returning the handles
    pub fn take_expiry_timers(&mut self) -> Vec<TimerHandle> {
        self.routes
            .values_mut()
            .filter_map(|entry| entry.expiry.take())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIFETIME: Duration = Duration::from_secs(5);

    fn addr(index: u32) -> MeshAddress {
        MeshAddress::from_index(index)
    }

    fn candidate(seqno: u32, metric: Metric) -> RouteCandidate {
        RouteCandidate {
            destination: addr(9),
            seqno: SeqNo::new(seqno),
            next_hop: NextHop {
                address: addr(2),
                interface: 0,
            },
            metric,
            hop_count: 2,
            lifetime: LIFETIME,
        }
    }

    #[test]
    fn test_first_information_creates_active_entry() {
        let mut table = RouteTable::new();
        let entry = table.update(candidate(4, 100), Duration::ZERO).unwrap();
        assert_eq!(entry.state, PathState::Active);
        assert_eq!(entry.expires_at, LIFETIME);
        assert_eq!(table.next_hop(&addr(9)).unwrap().address, addr(2));
    }

    #[test]
    fn test_update_rules() {
        let mut table = RouteTable::new();
        table.update(candidate(4, 100), Duration::ZERO);

        // Stale and equal-but-worse are rejected
        assert!(table.update(candidate(3, 1), Duration::ZERO).is_none());
        assert!(table.update(candidate(4, 100), Duration::ZERO).is_none());
        assert!(table.update(candidate(4, 150), Duration::ZERO).is_none());

        // Equal with better metric, or fresher with any metric, win
        assert!(table.update(candidate(4, 50), Duration::ZERO).is_some());
        assert!(table.update(candidate(5, 500), Duration::ZERO).is_some());
        assert_eq!(table.get(&addr(9)).unwrap().metric, 500);
    }

    #[test]
    fn test_request_then_resolve() {
        let mut table = RouteTable::new();
        assert_eq!(table.request(addr(9), SeqNo::new(2)), PathState::Requesting);
        assert!(table.active(&addr(9)).is_none());

        // Requesting accepts equal sequence numbers, not older ones
        assert!(!table.is_acceptable(&candidate(1, 10)));
        assert!(table.update(candidate(2, 10), Duration::ZERO).is_some());
        assert!(table.active(&addr(9)).is_some());

        // Active entries are not pulled back to Requesting
        assert_eq!(table.request(addr(9), SeqNo::new(2)), PathState::Active);
    }

    #[test]
    fn test_invalidate_returns_precursors() {
        let mut table = RouteTable::new();
        table.update(candidate(4, 100), Duration::ZERO);
        table.add_precursor(&addr(9), 0, addr(7));
        table.add_precursor(&addr(9), 1, addr(8));

        let invalidated = table.invalidate(&addr(9), SeqNo::new(5)).unwrap();
        assert_eq!(invalidated.precursors, vec![(0, addr(7)), (1, addr(8))]);

        let entry = table.get(&addr(9)).unwrap();
        assert_eq!(entry.state, PathState::Invalid);
        assert_eq!(entry.seqno, SeqNo::new(5));
        assert_eq!(entry.metric, Metric::MAX);

        // Only Active entries can be invalidated
        assert!(table.invalidate(&addr(9), SeqNo::new(6)).is_none());

        // Same sequence number with a real metric revives it
        assert!(table.update(candidate(5, 100), Duration::ZERO).is_some());
    }

    #[test]
    fn test_expire_respects_refresh() {
        let mut table = RouteTable::new();
        table.update(candidate(4, 100), Duration::ZERO);
        table.update(candidate(5, 100), Duration::from_secs(3));

        assert!(!table.expire(&addr(9), LIFETIME));
        assert!(table.expire(&addr(9), Duration::from_secs(8)));
        assert_eq!(table.get(&addr(9)).unwrap().state, PathState::Invalid);
    }

    #[test]
    fn test_via_next_hop() {
        let mut table = RouteTable::new();
        table.update(candidate(4, 100), Duration::ZERO);
        let hop = NextHop {
            address: addr(2),
            interface: 0,
        };
        assert_eq!(table.via(hop), vec![addr(9)]);
        assert!(table
            .via(NextHop {
                address: addr(2),
                interface: 1
            })
            .is_empty());
    }
}
