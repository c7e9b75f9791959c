//! Representative election.
//!
//! Each agency has at most one representative. Every host keeps a
//! [`LeaderSlot`] per agency and feeds it every claim it sees, its own and
//! remote ones, in whatever order they arrive. Claims are totally ordered
//! by `(claimed_at, agent_id)`, and the slot always keeps the smallest
//! claim it has seen since it was last vacated, so every host that has
//! seen the same claims agrees on the representative.
//!
//! The slot also remembers when each agent last left. Delivery is unordered
//! and may repeat, so a claim made before its agent's departure can still
//! arrive afterwards; such a claim is stale and never elects anyone.

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A claim to the representative role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub agent_id: String,
    /// Millisecond precision, the precision claims travel with.
    pub claimed_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(agent_id: impl Into<String>, claimed_at: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            claimed_at: claimed_at.trunc_subsecs(3),
        }
    }

    /// Whether this claim wins over `other`: earlier time first, then the
    /// lower agent id.
    pub fn precedes(&self, other: &Claim) -> bool {
        (self.claimed_at, self.agent_id.as_str()) < (other.claimed_at, other.agent_id.as_str())
    }
}

/// Result of offering a claim to a [`LeaderSlot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// The slot was vacant.
    Elected,
    /// The same claim already holds the slot.
    AlreadyHeld,
    /// The claim beat the previous holder.
    Superseded { previous: Claim },
    /// The current holder wins.
    Rejected { holder: Claim },
    /// The claim predates its agent's last departure.
    Stale { departed_at: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct SlotState {
    holder: Option<Claim>,
    departures: HashMap<String, DateTime<Utc>>,
}

/// Compare-and-set cell holding an agency's representative claim.
#[derive(Debug, Default)]
pub struct LeaderSlot {
    state: Mutex<SlotState>,
}

impl LeaderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, claim: Claim) -> Offer {
        let mut state = self.state.lock();
        if let Some(&departed_at) = state.departures.get(&claim.agent_id) {
            if claim.claimed_at <= departed_at {
                return Offer::Stale { departed_at };
            }
        }
        let Some(current) = state.holder.as_ref() else {
            state.holder = Some(claim);
            return Offer::Elected;
        };
        if *current == claim {
            return Offer::AlreadyHeld;
        }
        if claim.precedes(current) {
            let previous = current.clone();
            state.holder = Some(claim);
            return Offer::Superseded { previous };
        }
        Offer::Rejected {
            holder: current.clone(),
        }
    }

    /// Vacates the slot if `agent_id` holds it. Returns whether it did.
    pub fn resign(&self, agent_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.holder.as_ref().is_some_and(|c| c.agent_id == agent_id) {
            state.holder = None;
            true
        } else {
            false
        }
    }

    /// Records that `agent_id` left at `departed_at` and vacates the slot
    /// if it holds it with a claim made no later than that. A repeated or
    /// late departure keeps the latest time and leaves a newer claim in
    /// place. Returns whether the slot was vacated.
    pub fn depart(&self, agent_id: &str, departed_at: DateTime<Utc>) -> bool {
        let departed_at = departed_at.trunc_subsecs(3);
        let mut state = self.state.lock();
        let latest = state
            .departures
            .entry(agent_id.to_string())
            .or_insert(departed_at);
        if departed_at > *latest {
            *latest = departed_at;
        }
        let vacate = state
            .holder
            .as_ref()
            .is_some_and(|c| c.agent_id == agent_id && c.claimed_at <= departed_at);
        if vacate {
            state.holder = None;
        }
        vacate
    }

    /// When `agent_id` was last seen leaving, if ever.
    pub fn departed_at(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().departures.get(agent_id).copied()
    }

    pub fn holder(&self) -> Option<Claim> {
        self.state.lock().holder.clone()
    }

    pub fn is_vacant(&self) -> bool {
        self.state.lock().holder.is_none()
    }

    pub fn is_held_by(&self, agent_id: &str) -> bool {
        self.state
            .lock()
            .holder
            .as_ref()
            .is_some_and(|c| c.agent_id == agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_767_225_600_000 + ms).expect("valid timestamp")
    }

    #[test]
    fn vacant_slot_elects_first_claim() {
        let slot = LeaderSlot::new();
        assert!(slot.is_vacant());
        assert_eq!(slot.offer(Claim::new("a1", at(0))), Offer::Elected);
        assert!(slot.is_held_by("a1"));
        assert_eq!(slot.offer(Claim::new("a1", at(0))), Offer::AlreadyHeld);
    }

    #[test]
    fn later_claim_never_overrides() {
        let slot = LeaderSlot::new();
        slot.offer(Claim::new("b1", at(0)));
        assert_eq!(
            slot.offer(Claim::new("a1", at(5))),
            Offer::Rejected {
                holder: Claim::new("b1", at(0))
            }
        );
        assert!(slot.is_held_by("b1"));
    }

    #[test]
    fn earlier_claim_observed_late_supersedes() {
        let slot = LeaderSlot::new();
        slot.offer(Claim::new("b1", at(5)));
        assert_eq!(
            slot.offer(Claim::new("c1", at(1))),
            Offer::Superseded {
                previous: Claim::new("b1", at(5))
            }
        );
        assert!(slot.is_held_by("c1"));
    }

    #[test]
    fn ties_go_to_lowest_agent_id() {
        let slot = LeaderSlot::new();
        slot.offer(Claim::new("b1", at(3)));
        slot.offer(Claim::new("a1", at(3)));
        slot.offer(Claim::new("c1", at(3)));
        assert!(slot.is_held_by("a1"));
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let claims = [
            Claim::new("c1", at(2)),
            Claim::new("a1", at(2)),
            Claim::new("b1", at(1)),
        ];
        let forward = LeaderSlot::new();
        let backward = LeaderSlot::new();
        for claim in &claims {
            forward.offer(claim.clone());
        }
        for claim in claims.iter().rev() {
            backward.offer(claim.clone());
        }
        assert_eq!(forward.holder(), backward.holder());
        assert!(forward.is_held_by("b1"));
    }

    #[test]
    fn resign_only_vacates_for_holder() {
        let slot = LeaderSlot::new();
        slot.offer(Claim::new("a1", at(0)));
        assert!(!slot.resign("b1"));
        assert!(slot.resign("a1"));
        assert!(slot.is_vacant());
        assert!(!slot.resign("a1"));
    }

    #[test]
    fn claim_made_before_departure_is_stale() {
        let slot = LeaderSlot::new();
        assert_eq!(slot.offer(Claim::new("x1", at(0))), Offer::Elected);
        assert!(slot.depart("x1", at(10)));
        assert!(slot.is_vacant());

        assert_eq!(
            slot.offer(Claim::new("x1", at(0))),
            Offer::Stale { departed_at: at(10) }
        );
        assert_eq!(
            slot.offer(Claim::new("x1", at(10))),
            Offer::Stale { departed_at: at(10) }
        );
        assert!(slot.is_vacant());

        // Back after leaving: a fresh claim is accepted.
        assert_eq!(slot.offer(Claim::new("x1", at(11))), Offer::Elected);
    }

    #[test]
    fn late_departure_keeps_newer_claim() {
        let slot = LeaderSlot::new();
        slot.depart("a1", at(10));
        assert_eq!(slot.offer(Claim::new("a1", at(20))), Offer::Elected);

        // The old leave delivered again.
        assert!(!slot.depart("a1", at(10)));
        assert!(slot.is_held_by("a1"));
        assert_eq!(slot.departed_at("a1"), Some(at(10)));
    }

    #[test]
    fn departure_of_another_agent_leaves_holder() {
        let slot = LeaderSlot::new();
        slot.offer(Claim::new("a1", at(0)));
        assert!(!slot.depart("b1", at(5)));
        assert!(slot.is_held_by("a1"));
        assert!(matches!(
            slot.offer(Claim::new("b1", at(3))),
            Offer::Stale { .. }
        ));
    }

    #[test]
    fn claims_carry_millisecond_precision() {
        let precise = at(7) + TimeDelta::microseconds(456);
        assert_eq!(Claim::new("a1", precise).claimed_at, at(7));
    }
}
