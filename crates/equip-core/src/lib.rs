use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod columns;
pub mod validate;

pub use columns::{Column, ColumnMap, HeaderError};
pub use validate::{RawRow, RowRejected, RowValidator};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Available,
    Loaned,
    Retired,
}

impl Default for AssetStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl AssetStatus {
    pub const ALL: [AssetStatus; 3] = [
        AssetStatus::Available,
        AssetStatus::Loaned,
        AssetStatus::Retired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Available => "available",
            AssetStatus::Loaned => "loaned",
            AssetStatus::Retired => "retired",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        match trimmed {
            "貸出可" | "在庫" => return Ok(AssetStatus::Available),
            "貸出中" => return Ok(AssetStatus::Loaned),
            "廃棄" | "廃棄済" => return Ok(AssetStatus::Retired),
            _ => {}
        }
        let normalized = trimmed.to_lowercase();
        match normalized.as_str() {
            "available" => Ok(AssetStatus::Available),
            "loaned" | "on-loan" | "on_loan" => Ok(AssetStatus::Loaned),
            "retired" | "disposed" => Ok(AssetStatus::Retired),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// One validated row of the equipment table.
///
/// `asset_tag` is the operator-facing identity: loads upsert by it. The
/// surrogate row id is minted by the store and never travels through CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub asset_tag: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    /// `None` means the source did not say; the store keeps the current status
    /// of an existing row and uses [`AssetStatus::Available`] for a new one.
    #[serde(default)]
    pub status: Option<AssetStatus>,
}

impl EquipmentRecord {
    pub fn new(asset_tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            asset_tag: asset_tag.into(),
            name: name.into(),
            category: None,
            location: None,
            note: None,
            status: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_status(mut self, status: AssetStatus) -> Self {
        self.status = Some(status);
        self
    }
}
