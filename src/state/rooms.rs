//! Room membership: which live connections receive a party's broadcasts.
//!
//! A room exists while at least one connection sits in it. Duplicate
//! detection is keyed by user id, so the same user cannot hold two seats in
//! one party even across browser tabs.

use std::collections::HashMap;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::state::registry::{PartyId, UserId};

/// Process-local identifier of one WebSocket connection.
pub type ConnId = Uuid;

/// All party rooms, keyed by party id.
#[derive(Debug, Default)]
pub struct RoomSet {
    rooms: HashMap<PartyId, IndexMap<ConnId, UserId>>,
}

impl RoomSet {
    /// Create an empty room set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `user_id` already holds a seat in the party's room.
    pub fn contains_user(&self, party_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(party_id)
            .is_some_and(|members| members.values().any(|member| member == user_id))
    }

    /// Seat a connection in a party's room.
    pub fn insert(&mut self, party_id: PartyId, conn_id: ConnId, user_id: UserId) {
        self.rooms.entry(party_id).or_default().insert(conn_id, user_id);
    }

    /// Remove a connection's seat. Returns the vacating user when the
    /// connection actually sat in the room.
    pub fn remove(&mut self, party_id: &str, conn_id: ConnId) -> Option<UserId> {
        let members = self.rooms.get_mut(party_id)?;
        let removed = members.shift_remove(&conn_id);
        if members.is_empty() {
            self.rooms.remove(party_id);
        }
        removed
    }

    /// Remove a connection from every room it sits in; returns the parties it
    /// vacated together with the user id that held the seat.
    pub fn purge_connection(&mut self, conn_id: ConnId) -> Vec<(PartyId, UserId)> {
        let mut vacated = Vec::new();
        self.rooms.retain(|party_id, members| {
            if let Some(user_id) = members.shift_remove(&conn_id) {
                vacated.push((party_id.clone(), user_id));
            }
            !members.is_empty()
        });
        vacated
    }

    /// Connections currently seated in a party's room, in join order.
    pub fn members(&self, party_id: &str) -> Option<&IndexMap<ConnId, UserId>> {
        self.rooms.get(party_id)
    }

    /// Drop a whole room; returns its members for a parting notification.
    pub fn remove_party(&mut self, party_id: &str) -> Option<IndexMap<ConnId, UserId>> {
        self.rooms.remove(party_id)
    }

    /// Number of parties with at least one seated connection.
    pub fn party_count(&self) -> usize {
        self.rooms.len()
    }
}
