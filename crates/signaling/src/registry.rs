//! Room membership bookkeeping
//!
//! Rooms live in a sharded map; each room carries its own mutex so that
//! concurrent joins to the same room are serialized while different rooms
//! proceed independently. A room is created on first join and retired once
//! its last member leaves.
//!
//! Map guards are never held while a room mutex is taken, so a leave that
//! retires a room (room mutex, then map shard) cannot deadlock against a join
//! (map shard released, then room mutex).

use captionroom_protocol::{RoomId, SessionId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// A session admitted to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub session_id: SessionId,
    /// Whether this member has shared the room with another session before
    pub paired: bool,
}

/// Result of a join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Session is now a member
    Admitted {
        room_id: RoomId,
        /// Other members at commit time, in arrival order, with their state
        /// from before this join
        existing: Vec<Member>,
        /// Session was already a member; nothing changed
        rejoined: bool,
    },
    /// Room already holds `capacity` sessions
    Full { room_id: RoomId, capacity: usize },
}

impl JoinOutcome {
    /// Whether the session ended up in the room
    pub fn is_admitted(&self) -> bool {
        matches!(self, JoinOutcome::Admitted { .. })
    }
}

/// A committed leave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    pub session_id: SessionId,
    /// Arrival-order index the session held before leaving
    pub position: usize,
    /// Members still present after the leave, in arrival order
    pub remaining: Vec<SessionId>,
}

#[derive(Debug, Default)]
struct RoomSlot {
    members: Vec<Member>,
    /// Set under the room lock right before the slot is unlinked from the map
    retired: bool,
}

/// Registry of rooms and their members
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Mutex<RoomSlot>>>,
    sessions: DashMap<SessionId, RoomId>,
    capacity: usize,
}

impl RoomRegistry {
    /// Create a registry admitting at most `capacity` sessions per room
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Sessions admitted per room
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add `session_id` to `room_id`, creating the room if needed
    ///
    /// A session already in another room is moved out of it first without
    /// notifying anyone; callers that need departure notifications should
    /// call [`leave_then`](Self::leave_then) beforehand.
    pub fn join(&self, room_id: &RoomId, session_id: &SessionId) -> JoinOutcome {
        self.join_then(room_id, session_id, |_| ()).0
    }

    /// Like [`join`](Self::join), running `then` while the room is still locked
    ///
    /// Anything `then` does is ordered with respect to every other join or
    /// leave of the same room.
    pub fn join_then<R>(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        then: impl FnOnce(&JoinOutcome) -> R,
    ) -> (JoinOutcome, R) {
        let current = self.room_of(session_id);
        if current.as_ref().is_some_and(|current| current != room_id) {
            self.leave(session_id);
        }

        loop {
            let slot = Arc::clone(
                &self
                    .rooms
                    .entry(room_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(RoomSlot::default()))),
            );

            let mut room = slot.lock();
            if room.retired {
                // Last member left between lookup and lock; the slot is already
                // unlinked so the next lookup creates a fresh one
                continue;
            }

            let outcome = if room.members.iter().any(|m| &m.session_id == session_id) {
                JoinOutcome::Admitted {
                    room_id: room_id.clone(),
                    existing: room
                        .members
                        .iter()
                        .filter(|m| &m.session_id != session_id)
                        .cloned()
                        .collect(),
                    rejoined: true,
                }
            } else if room.members.len() >= self.capacity {
                JoinOutcome::Full {
                    room_id: room_id.clone(),
                    capacity: self.capacity,
                }
            } else {
                let existing = room.members.clone();
                let paired = !existing.is_empty();
                for member in room.members.iter_mut() {
                    member.paired |= paired;
                }
                room.members.push(Member {
                    session_id: session_id.clone(),
                    paired,
                });
                self.sessions.insert(session_id.clone(), room_id.clone());
                JoinOutcome::Admitted {
                    room_id: room_id.clone(),
                    existing,
                    rejoined: false,
                }
            };

            let result = then(&outcome);

            match &outcome {
                JoinOutcome::Admitted { rejoined: false, .. } => {
                    info!(
                        "Session {} joined room {} ({} members)",
                        session_id,
                        room_id,
                        room.members.len()
                    );
                }
                JoinOutcome::Admitted { rejoined: true, .. } => {
                    debug!("Session {} already in room {}", session_id, room_id);
                }
                JoinOutcome::Full { capacity, .. } => {
                    info!(
                        "Session {} rejected from full room {} (capacity {})",
                        session_id, room_id, capacity
                    );
                }
            }

            return (outcome, result);
        }
    }

    /// Remove `session_id` from its room
    ///
    /// Returns `None` when the session is not in any room, which makes
    /// repeated leaves harmless.
    pub fn leave(&self, session_id: &SessionId) -> Option<Departure> {
        self.leave_then(session_id, |_| ()).map(|(departure, _)| departure)
    }

    /// Like [`leave`](Self::leave), running `then` while the room is still locked
    pub fn leave_then<R>(
        &self,
        session_id: &SessionId,
        then: impl FnOnce(&Departure) -> R,
    ) -> Option<(Departure, R)> {
        let room_id = self.sessions.get(session_id).map(|r| r.value().clone())?;

        let slot = match self.rooms.get(&room_id).map(|r| Arc::clone(r.value())) {
            Some(slot) => slot,
            None => {
                self.sessions.remove_if(session_id, |_, r| r == &room_id);
                return None;
            }
        };

        let mut room = slot.lock();
        let position = room
            .members
            .iter()
            .position(|m| &m.session_id == session_id)?;
        room.members.remove(position);
        self.sessions.remove_if(session_id, |_, r| r == &room_id);

        let departure = Departure {
            room_id: room_id.clone(),
            session_id: session_id.clone(),
            position,
            remaining: room.members.iter().map(|m| m.session_id.clone()).collect(),
        };

        if room.members.is_empty() {
            room.retired = true;
            self.rooms
                .remove_if(&room_id, |_, current| Arc::ptr_eq(current, &slot));
            debug!("Room {} retired", room_id);
        }

        info!(
            "Session {} left room {} ({} remaining)",
            session_id,
            room_id,
            departure.remaining.len()
        );

        let result = then(&departure);
        Some((departure, result))
    }

    /// Current members of a room in arrival order; empty for unknown rooms
    pub fn members_of(&self, room_id: &RoomId) -> Vec<SessionId> {
        match self.rooms.get(room_id).map(|r| Arc::clone(r.value())) {
            Some(slot) => slot
                .lock()
                .members
                .iter()
                .map(|m| m.session_id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Room a session currently belongs to
    pub fn room_of(&self, session_id: &SessionId) -> Option<RoomId> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    /// Number of live rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of sessions that are members of some room
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn room(id: &str) -> RoomId {
        RoomId::new(id)
    }

    fn session(id: &str) -> SessionId {
        SessionId::new(id)
    }

    #[test]
    fn test_join_creates_room() {
        let registry = RoomRegistry::default();
        let outcome = registry.join(&room("abc"), &session("a"));

        assert_eq!(
            outcome,
            JoinOutcome::Admitted {
                room_id: room("abc"),
                existing: vec![],
                rejoined: false,
            }
        );
        assert_eq!(registry.members_of(&room("abc")), vec![session("a")]);
        assert_eq!(registry.room_of(&session("a")), Some(room("abc")));
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_second_join_sees_first_member() {
        let registry = RoomRegistry::default();
        registry.join(&room("abc"), &session("a"));

        match registry.join(&room("abc"), &session("b")) {
            JoinOutcome::Admitted { existing, .. } => {
                assert_eq!(existing.len(), 1);
                assert_eq!(existing[0].session_id, session("a"));
                assert!(!existing[0].paired);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_third_join_is_rejected() {
        let registry = RoomRegistry::default();
        registry.join(&room("abc"), &session("a"));
        registry.join(&room("abc"), &session("b"));

        let outcome = registry.join(&room("abc"), &session("c"));
        assert_eq!(
            outcome,
            JoinOutcome::Full {
                room_id: room("abc"),
                capacity: 2,
            }
        );
        assert_eq!(registry.members_of(&room("abc")).len(), 2);
        assert_eq!(registry.room_of(&session("c")), None);
    }

    #[test]
    fn test_rejoin_is_idempotent() {
        let registry = RoomRegistry::default();
        registry.join(&room("abc"), &session("a"));

        match registry.join(&room("abc"), &session("a")) {
            JoinOutcome::Admitted {
                existing, rejoined, ..
            } => {
                assert!(existing.is_empty());
                assert!(rejoined);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(registry.members_of(&room("abc")), vec![session("a")]);
    }

    #[test]
    fn test_joining_another_room_moves_session() {
        let registry = RoomRegistry::default();
        registry.join(&room("one"), &session("a"));
        registry.join(&room("two"), &session("a"));

        assert!(registry.members_of(&room("one")).is_empty());
        assert_eq!(registry.members_of(&room("two")), vec![session("a")]);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_paired_flag_survives_departure() {
        let registry = RoomRegistry::default();
        registry.join(&room("abc"), &session("a"));
        registry.join(&room("abc"), &session("b"));
        registry.leave(&session("b"));

        match registry.join(&room("abc"), &session("c")) {
            JoinOutcome::Admitted { existing, .. } => {
                assert_eq!(existing[0].session_id, session("a"));
                assert!(existing[0].paired);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_leave_reports_remaining_and_retires_room() {
        let registry = RoomRegistry::default();
        registry.join(&room("abc"), &session("a"));
        registry.join(&room("abc"), &session("b"));

        let departure = registry.leave(&session("a")).unwrap();
        assert_eq!(departure.position, 0);
        assert_eq!(departure.remaining, vec![session("b")]);
        assert_eq!(registry.room_count(), 1);

        let departure = registry.leave(&session("b")).unwrap();
        assert!(departure.remaining.is_empty());
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let registry = RoomRegistry::default();
        registry.join(&room("abc"), &session("a"));

        assert!(registry.leave(&session("a")).is_some());
        assert!(registry.leave(&session("a")).is_none());
        assert!(registry.leave(&session("never-joined")).is_none());
    }

    #[test]
    fn test_join_then_runs_with_outcome() {
        let registry = RoomRegistry::default();
        let (_, seen) = registry.join_then(&room("abc"), &session("a"), |outcome| {
            outcome.is_admitted()
        });
        assert!(seen);
    }

    #[test]
    fn test_concurrent_joins_admit_exactly_capacity() {
        let registry = Arc::new(RoomRegistry::new(2));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry
                        .join(&RoomId::new("race"), &SessionId::new(format!("s{}", i)))
                        .is_admitted()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, 2);
        assert_eq!(registry.members_of(&room("race")).len(), 2);
    }

    #[test]
    fn test_concurrent_churn_leaves_no_rooms() {
        let registry = Arc::new(RoomRegistry::new(2));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let session = SessionId::new(format!("s{}", i));
                    for _ in 0..200 {
                        registry.join(&RoomId::new("churn"), &session);
                        registry.leave(&session);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.session_count(), 0);
    }
}
