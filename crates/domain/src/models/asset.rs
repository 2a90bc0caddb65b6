//! Tracked asset reference.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolved identity of an asset tag: which asset it is attached to and
/// which organization owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub asset_id: Uuid,
    pub asset_tag_id: String,
    pub organization_id: Uuid,
    pub name: String,
}
