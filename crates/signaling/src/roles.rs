//! Initiator / responder assignment
//!
//! Exactly one side of a pair sends the offer. The member already present
//! when a newcomer arrives becomes the Initiator; the newcomer becomes the
//! Responder. Roles are decided from a committed [`JoinOutcome`], so the
//! decision is as ordered as the join itself.
//!
//! The active pair of a room is always its two oldest members. When one of
//! them leaves a room that still holds two or more sessions, the two oldest
//! remaining members form the next pair.

use crate::registry::{Departure, JoinOutcome};
use captionroom_protocol::{PeerParams, Role, RoleAssignedParams, ServerEvent, SessionId};

/// Roles decided for one newly formed pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub initiator: SessionId,
    pub responder: SessionId,
    /// The initiator negotiated with an earlier peer before this one
    pub late: bool,
}

impl Assignment {
    /// Role of `session_id` in this pair
    pub fn role_of(&self, session_id: &SessionId) -> Role {
        if session_id == &self.initiator {
            Role::Initiator
        } else if session_id == &self.responder {
            Role::Responder
        } else {
            Role::Unassigned
        }
    }

    /// Events to deliver, responder's first
    ///
    /// The responder learns its role before the initiator learns about the
    /// responder, so the responder is ready for the offer by the time the
    /// initiator can produce one.
    pub fn notifications(&self) -> [(SessionId, ServerEvent); 2] {
        let announce = PeerParams {
            peer_id: self.responder.clone(),
        };
        let initiator_event = if self.late {
            ServerEvent::PeerJoinedLate(announce)
        } else {
            ServerEvent::PeerJoined(announce)
        };

        [
            (
                self.responder.clone(),
                ServerEvent::RoleAssigned(RoleAssignedParams {
                    initiator: false,
                    peer_id: self.initiator.clone(),
                }),
            ),
            (self.initiator.clone(), initiator_event),
        ]
    }
}

/// Decides roles on each committed join
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAssignment;

impl RoleAssignment {
    /// Pair `newcomer` with the member already present, if there is exactly one
    ///
    /// Returns `None` for a first member (stays Unassigned), a rejected or
    /// repeated join, and for arrivals beyond the second member of a larger
    /// room, who only take part in caption fan-out.
    pub fn assign(outcome: &JoinOutcome, newcomer: &SessionId) -> Option<Assignment> {
        match outcome {
            JoinOutcome::Admitted {
                existing,
                rejoined: false,
                ..
            } if existing.len() == 1 => {
                let present = &existing[0];
                Some(Assignment {
                    initiator: present.session_id.clone(),
                    responder: newcomer.clone(),
                    late: present.paired,
                })
            }
            _ => None,
        }
    }

    /// Re-pair the room after a committed leave
    ///
    /// Only a departure from the active pair matters, and only when at least
    /// two members remain. The older remaining member initiates. Both have
    /// shared the room before, so the initiator is always a late joiner.
    pub fn reassign(departure: &Departure) -> Option<Assignment> {
        match departure.remaining.as_slice() {
            [first, second, ..] if departure.position < 2 => Some(Assignment {
                initiator: first.clone(),
                responder: second.clone(),
                late: true,
            }),
            _ => None,
        }
    }
}
