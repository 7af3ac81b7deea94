//! Tracked port sets for batch reconciliation.
//!
//! Three disjoint sets partition every tracked port identifier: `init`
//! (present at batch start, never auto-claimed), `working` (an active
//! session holds the device) and `idle` (a session completed there). A port
//! that leaves live enumeration is purged from all three, so a device that
//! is unplugged and replugged comes back as genuinely new.

use std::collections::HashSet;

/// Which tracked set a port currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Present at batch start; never auto-claimed.
    Init,
    /// Held by an active session.
    Working,
    /// A session completed here; waiting for removal.
    Idle,
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Ports purged from tracking because they left live enumeration.
    pub removed: Vec<String>,
    /// Live ports in none of the tracked sets, in enumeration order.
    pub fresh: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PortSets {
    init: HashSet<String>,
    working: HashSet<String>,
    idle: HashSet<String>,
}

impl PortSets {
    pub fn new() -> Self {
        PortSets::default()
    }

    /// Snapshot the live ports as pre-existing at batch start; working and
    /// idle start empty.
    pub fn snapshot_init(&mut self, live: &[String]) {
        self.init = live.iter().cloned().collect();
        self.working.clear();
        self.idle.clear();
    }

    pub fn is_tracked(&self, port: &str) -> bool {
        self.init.contains(port) || self.working.contains(port) || self.idle.contains(port)
    }

    pub fn is_working(&self, port: &str) -> bool {
        self.working.contains(port)
    }

    pub fn is_idle(&self, port: &str) -> bool {
        self.idle.contains(port)
    }

    pub fn is_init(&self, port: &str) -> bool {
        self.init.contains(port)
    }

    pub fn working(&self) -> HashSet<String> {
        self.working.clone()
    }

    pub fn state_of(&self, port: &str) -> Option<PortState> {
        if self.working.contains(port) {
            Some(PortState::Working)
        } else if self.idle.contains(port) {
            Some(PortState::Idle)
        } else if self.init.contains(port) {
            Some(PortState::Init)
        } else {
            None
        }
    }

    /// Mark a port as held by an active session. A port already working
    /// stays working; claiming never demotes another set's membership.
    pub fn claim(&mut self, port: &str) {
        self.init.remove(port);
        self.idle.remove(port);
        self.working.insert(port.to_string());
    }

    /// Session completion: the port leaves `working` and becomes idle. A
    /// port that was purged mid-flash stays untracked.
    pub fn release(&mut self, port: &str) {
        if self.working.remove(port) {
            self.idle.insert(port.to_string());
        }
    }

    /// One reconciliation cycle against a live enumeration snapshot.
    /// Removals are fully resolved before the fresh set is computed.
    pub fn reconcile(&mut self, live: &[String]) -> Reconciliation {
        let live_set: HashSet<&str> = live.iter().map(String::as_str).collect();
        let mut removed: Vec<String> = self
            .init
            .iter()
            .chain(self.working.iter())
            .chain(self.idle.iter())
            .filter(|p| !live_set.contains(p.as_str()))
            .cloned()
            .collect();
        removed.sort();
        for port in &removed {
            self.init.remove(port);
            self.working.remove(port);
            self.idle.remove(port);
        }

        let fresh: Vec<String> = live
            .iter()
            .filter(|p| !self.is_tracked(p))
            .cloned()
            .collect();

        Reconciliation { removed, fresh }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(ports: &[&str]) -> Vec<String> {
        ports.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn sets_stay_disjoint_through_claim_and_release() {
        let mut sets = PortSets::new();
        sets.snapshot_init(&live(&["a"]));
        sets.claim("b");
        assert!(sets.is_working("b"));
        sets.release("b");
        assert!(sets.is_idle("b"));
        assert!(!sets.is_working("b"));
        assert!(sets.is_init("a"));
        assert!(!sets.is_working("a") && !sets.is_idle("a"));
    }

    #[test]
    fn init_ports_are_never_fresh_while_present() {
        let mut sets = PortSets::new();
        sets.snapshot_init(&live(&["a", "b"]));
        let r = sets.reconcile(&live(&["a", "b"]));
        assert!(r.fresh.is_empty());
        assert!(r.removed.is_empty());
    }

    #[test]
    fn removed_init_port_is_fresh_on_reappearance() {
        let mut sets = PortSets::new();
        sets.snapshot_init(&live(&["a"]));

        let r = sets.reconcile(&live(&[]));
        assert_eq!(r.removed, vec!["a"]);
        assert!(!sets.is_tracked("a"));

        let r = sets.reconcile(&live(&["a"]));
        assert_eq!(r.fresh, vec!["a"]);
    }

    #[test]
    fn tracked_ports_are_a_subset_of_live_after_reconcile() {
        let mut sets = PortSets::new();
        sets.snapshot_init(&live(&["a", "b"]));
        sets.claim("c");
        sets.claim("d");
        sets.release("d");

        let snapshot = live(&["a", "d", "e"]);
        sets.reconcile(&snapshot);
        for port in ["a", "b", "c", "d", "e"] {
            if sets.is_tracked(port) {
                assert!(snapshot.contains(&port.to_string()), "{} not live", port);
            }
        }
        assert!(sets.is_init("a"));
        assert!(!sets.is_tracked("b"));
        assert!(!sets.is_tracked("c"));
        assert!(sets.is_idle("d"));
    }

    #[test]
    fn release_after_purge_does_not_resurrect_the_port() {
        let mut sets = PortSets::new();
        sets.claim("a");
        sets.reconcile(&live(&[]));
        sets.release("a");
        assert!(!sets.is_tracked("a"));
    }

    #[test]
    fn fresh_preserves_enumeration_order() {
        let mut sets = PortSets::new();
        sets.snapshot_init(&live(&["b"]));
        let r = sets.reconcile(&live(&["c", "b", "a"]));
        assert_eq!(r.fresh, vec!["c", "a"]);
    }
}
