use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::registry::{LastPosition, MediaKind, PlayOrder, RegistrySnapshot};

/// Stored representation of the whole registry snapshot.
///
/// Only covers what must survive a restart: play orders and remembered
/// positions. Presence maps and room membership are rebuilt from live
/// connections and are deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntity {
    /// Current play order per party id.
    #[serde(default)]
    pub play_orders: HashMap<String, PlayOrderEntity>,
    /// Remembered positions per party id, then per media item id.
    #[serde(default)]
    pub last_positions: HashMap<String, HashMap<String, f64>>,
    /// Server time when the snapshot was taken, epoch milliseconds.
    #[serde(default)]
    pub saved_at_ms: i64,
}

/// Stored representation of one party's play order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayOrderEntity {
    /// Member whose wish produced this order.
    pub issuer: String,
    /// Party the order applies to.
    pub party_id: String,
    /// Media item to play.
    pub media_item_id: String,
    /// Whether the item streams from the web or local files.
    pub kind: MediaKind,
    /// Play (true) or pause (false).
    pub is_playing: bool,
    /// Playback position in seconds.
    pub position: f64,
    /// Server-normalized timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// Resume point attached to the order, if any.
    pub last_position: Option<LastPositionEntity>,
}

/// Stored representation of a remembered position attached to an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastPositionEntity {
    /// Media item the position belongs to.
    pub item_id: String,
    /// Position in seconds.
    pub position: f64,
}

impl From<PlayOrder> for PlayOrderEntity {
    fn from(order: PlayOrder) -> Self {
        Self {
            issuer: order.issuer,
            party_id: order.party_id,
            media_item_id: order.media_item_id,
            kind: order.kind,
            is_playing: order.is_playing,
            position: order.position,
            timestamp: order.timestamp,
            last_position: order.last_position.map(Into::into),
        }
    }
}

impl From<PlayOrderEntity> for PlayOrder {
    fn from(entity: PlayOrderEntity) -> Self {
        Self {
            issuer: entity.issuer,
            party_id: entity.party_id,
            media_item_id: entity.media_item_id,
            kind: entity.kind,
            is_playing: entity.is_playing,
            position: entity.position,
            timestamp: entity.timestamp,
            last_position: entity.last_position.map(Into::into),
        }
    }
}

impl From<LastPosition> for LastPositionEntity {
    fn from(last: LastPosition) -> Self {
        Self {
            item_id: last.item_id,
            position: last.position,
        }
    }
}

impl From<LastPositionEntity> for LastPosition {
    fn from(entity: LastPositionEntity) -> Self {
        Self {
            item_id: entity.item_id,
            position: entity.position,
        }
    }
}

impl SnapshotEntity {
    /// Build a storable entity from a registry snapshot.
    pub fn from_snapshot(snapshot: RegistrySnapshot, saved_at_ms: i64) -> Self {
        Self {
            play_orders: snapshot
                .play_orders
                .into_iter()
                .map(|(party_id, order)| (party_id, order.into()))
                .collect(),
            last_positions: snapshot.last_positions,
            saved_at_ms,
        }
    }

    /// Rebuild the registry snapshot this entity was taken from.
    pub fn into_snapshot(self) -> RegistrySnapshot {
        RegistrySnapshot {
            play_orders: self
                .play_orders
                .into_iter()
                .map(|(party_id, order)| (party_id, order.into()))
                .collect(),
            last_positions: self.last_positions,
        }
    }
}
