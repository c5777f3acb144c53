//! Authoritative per-party playback state.
//!
//! The registry is owned by the coordination task and never locked: every
//! access goes through that task's command loop. Play orders and remembered
//! positions make up the durable subset captured by snapshots; member status
//! maps are ephemeral and die with the process.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Opaque party identifier minted by the upstream backend.
pub type PartyId = String;
/// Opaque user identifier minted by the upstream backend.
pub type UserId = String;
/// Opaque media item identifier minted by the upstream backend.
pub type MediaItemId = String;

/// Where a media item streams from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Remote stream (YouTube and friends).
    Web,
    /// Server-hosted file.
    File,
}

/// Authoritative playback intent for one party; replaced wholesale by every
/// accepted play wish.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayOrder {
    /// Member whose wish produced this order.
    pub issuer: UserId,
    /// Party the order applies to.
    pub party_id: PartyId,
    /// Media item to play.
    pub media_item_id: MediaItemId,
    /// Whether the item streams from the web or local files.
    pub kind: MediaKind,
    /// Play (true) or pause (false).
    pub is_playing: bool,
    /// Playback position in seconds.
    pub position: f64,
    /// Server-normalized timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// Resume point attached to the order, if any.
    pub last_position: Option<LastPosition>,
}

/// A remembered playback position for one media item.
#[derive(Debug, Clone, PartialEq)]
pub struct LastPosition {
    /// Media item the position belongs to.
    pub item_id: MediaItemId,
    /// Position in seconds.
    pub position: f64,
}

/// One member's latest self-reported progress.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberStatus {
    /// Whether the member's player is currently playing.
    pub is_playing: bool,
    /// Playback position in seconds.
    pub position: f64,
    /// The member's own wall clock for the report, epoch milliseconds.
    pub timestamp: i64,
    /// Offset from that member's clock to server time, milliseconds.
    pub server_time_offset: i64,
    /// WebRTC mode the member advertises, if any.
    pub web_rtc_mode: Option<String>,
}

/// Durable subset of the registry, captured for persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    /// Current play order per party id.
    pub play_orders: HashMap<PartyId, PlayOrder>,
    /// Remembered positions per party id, then per media item id.
    pub last_positions: HashMap<PartyId, HashMap<MediaItemId, f64>>,
}

/// Per-party synchronization state: play orders, remembered positions, and
/// member status maps.
#[derive(Debug, Default)]
pub struct PartySessionRegistry {
    play_orders: HashMap<PartyId, PlayOrder>,
    last_positions: HashMap<PartyId, HashMap<MediaItemId, f64>>,
    statuses: HashMap<PartyId, IndexMap<UserId, MemberStatus>>,
}

impl PartySessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from a restored snapshot. Status maps start empty;
    /// they only ever reflect live connections.
    pub fn restore(snapshot: RegistrySnapshot) -> Self {
        Self {
            play_orders: snapshot.play_orders,
            last_positions: snapshot.last_positions,
            statuses: HashMap::new(),
        }
    }

    /// The party's current play order, if any wish was accepted yet.
    pub fn current_order(&self, party_id: &str) -> Option<&PlayOrder> {
        self.play_orders.get(party_id)
    }

    /// Replace the party's play order. Last write wins by arrival order.
    pub fn set_current_order(&mut self, order: PlayOrder) {
        self.play_orders.insert(order.party_id.clone(), order);
    }

    /// Remembered position for one media item of one party.
    pub fn last_position(&self, party_id: &str, item_id: &str) -> Option<f64> {
        self.last_positions
            .get(party_id)
            .and_then(|positions| positions.get(item_id))
            .copied()
    }

    /// Remember a position for one media item of one party, overwriting any
    /// previous value. Entries never expire.
    pub fn set_last_position(&mut self, party_id: PartyId, item_id: MediaItemId, position: f64) {
        self.last_positions
            .entry(party_id)
            .or_default()
            .insert(item_id, position);
    }

    /// Latest report per member for one party, in first-report order.
    pub fn status_map(&self, party_id: &str) -> Option<&IndexMap<UserId, MemberStatus>> {
        self.statuses.get(party_id)
    }

    /// Overwrite one member's status and return the party's full map for
    /// broadcasting.
    pub fn upsert_status(
        &mut self,
        party_id: PartyId,
        user_id: UserId,
        status: MemberStatus,
    ) -> &IndexMap<UserId, MemberStatus> {
        let members = self.statuses.entry(party_id).or_default();
        members.insert(user_id, status);
        members
    }

    /// Drop every trace of a party: order, remembered positions, statuses.
    pub fn evict_party(&mut self, party_id: &str) {
        self.play_orders.remove(party_id);
        self.last_positions.remove(party_id);
        self.statuses.remove(party_id);
    }

    /// Capture the durable subset for persistence.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            play_orders: self.play_orders.clone(),
            last_positions: self.last_positions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(party_id: &str, issuer: &str, position: f64) -> PlayOrder {
        PlayOrder {
            issuer: issuer.into(),
            party_id: party_id.into(),
            media_item_id: "m1".into(),
            kind: MediaKind::Web,
            is_playing: true,
            position,
            timestamp: 1_726_000_000_000,
            last_position: None,
        }
    }

    fn status(position: f64, offset: i64) -> MemberStatus {
        MemberStatus {
            is_playing: true,
            position,
            timestamp: 1_726_000_000_000,
            server_time_offset: offset,
            web_rtc_mode: None,
        }
    }

    #[test]
    fn orders_replace_wholesale() {
        let mut registry = PartySessionRegistry::new();
        registry.set_current_order(order("p1", "u1", 10.0));
        registry.set_current_order(order("p1", "u2", 99.0));

        let current = registry.current_order("p1").unwrap();
        assert_eq!(current.issuer, "u2");
        assert_eq!(current.position, 99.0);
        assert!(registry.current_order("p2").is_none());
    }

    #[test]
    fn last_positions_overwrite_per_item() {
        let mut registry = PartySessionRegistry::new();
        registry.set_last_position("p1".into(), "m0".into(), 120.0);
        registry.set_last_position("p1".into(), "m0".into(), 240.0);
        registry.set_last_position("p1".into(), "m1".into(), 5.0);

        assert_eq!(registry.last_position("p1", "m0"), Some(240.0));
        assert_eq!(registry.last_position("p1", "m1"), Some(5.0));
        assert_eq!(registry.last_position("p1", "m2"), None);
        assert_eq!(registry.last_position("p2", "m0"), None);
    }

    #[test]
    fn status_map_keeps_first_report_order() {
        let mut registry = PartySessionRegistry::new();
        registry.upsert_status("p1".into(), "u2".into(), status(10.0, 100));
        registry.upsert_status("p1".into(), "u1".into(), status(11.0, -50));
        let members = registry.upsert_status("p1".into(), "u2".into(), status(12.0, 100));

        let keys: Vec<_> = members.keys().cloned().collect();
        assert_eq!(keys, vec!["u2".to_string(), "u1".to_string()]);
        assert_eq!(members["u2"].position, 12.0);
    }

    #[test]
    fn evict_party_clears_every_trace() {
        let mut registry = PartySessionRegistry::new();
        registry.set_current_order(order("p1", "u1", 10.0));
        registry.set_last_position("p1".into(), "m0".into(), 120.0);
        registry.upsert_status("p1".into(), "u1".into(), status(10.0, 0));
        registry.set_current_order(order("p2", "u9", 1.0));

        registry.evict_party("p1");

        assert!(registry.current_order("p1").is_none());
        assert_eq!(registry.last_position("p1", "m0"), None);
        assert!(registry.status_map("p1").is_none());
        assert!(registry.current_order("p2").is_some());
    }

    #[test]
    fn snapshot_restore_round_trips_durable_state() {
        let mut registry = PartySessionRegistry::new();
        registry.set_current_order(order("p1", "u1", 42.0));
        registry.set_last_position("p1".into(), "m0".into(), 120.0);
        registry.upsert_status("p1".into(), "u1".into(), status(42.0, 600));

        let restored = PartySessionRegistry::restore(registry.snapshot());

        assert_eq!(
            restored.current_order("p1"),
            registry.current_order("p1")
        );
        assert_eq!(restored.last_position("p1", "m0"), Some(120.0));
        // Presence is rebuilt from live connections, never from disk.
        assert!(restored.status_map("p1").is_none());
    }
}
