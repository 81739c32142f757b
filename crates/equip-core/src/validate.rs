use crate::columns::{Column, ColumnMap};
use crate::{AssetStatus, EquipmentRecord};
use serde::Serialize;
use thiserror::Error;

/// A data row as it came off the file: fields in file order, untrimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based position among data rows; the header is not counted.
    pub row: usize,
    /// 1-based line in the source file where the record starts.
    pub line: u64,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("row {row} (line {line}): {reason}")]
pub struct RowRejected {
    pub row: usize,
    pub line: u64,
    pub reason: String,
}

/// Maps raw rows onto [`EquipmentRecord`]s through a header-derived
/// [`ColumnMap`]. Validation never fails past its own row.
#[derive(Debug, Clone)]
pub struct RowValidator {
    columns: ColumnMap,
}

impl RowValidator {
    pub fn new(columns: ColumnMap) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn validate(&self, raw: &RawRow) -> Result<EquipmentRecord, RowRejected> {
        let reject = |reason: String| RowRejected {
            row: raw.row,
            line: raw.line,
            reason,
        };

        let width = self.columns.width();
        if raw.fields.len() > width
            && raw.fields[width..]
                .iter()
                .any(|field| !field.trim().is_empty())
        {
            return Err(reject(format!(
                "expected {width} fields, found {}",
                raw.fields.len()
            )));
        }

        let missing = Column::REQUIRED
            .iter()
            .filter(|column| self.field(raw, **column).is_none())
            .map(|column| format!("`{column}`"))
            .collect::<Vec<_>>();
        match missing.len() {
            0 => {}
            1 => return Err(reject(format!("missing required field {}", missing[0]))),
            _ => {
                return Err(reject(format!(
                    "missing required fields {}",
                    missing.join(", ")
                )))
            }
        }

        let asset_tag = self.field(raw, Column::AssetTag).unwrap_or_default();
        if asset_tag.chars().any(char::is_control) {
            return Err(reject(
                "asset_tag contains control characters".to_string(),
            ));
        }
        let name = self.field(raw, Column::Name).unwrap_or_default();

        let status = match self.field(raw, Column::Status) {
            Some(value) => Some(value.parse::<AssetStatus>().map_err(|_| {
                reject(format!(
                    "unknown status value `{value}` (expected available, loaned or retired)"
                ))
            })?),
            None => None,
        };

        Ok(EquipmentRecord {
            asset_tag: asset_tag.to_string(),
            name: name.to_string(),
            category: self.field(raw, Column::Category).map(str::to_string),
            location: self.field(raw, Column::Location).map(str::to_string),
            note: self.field(raw, Column::Note).map(str::to_string),
            status,
        })
    }

    fn field<'r>(&self, raw: &'r RawRow, column: Column) -> Option<&'r str> {
        let index = self.columns.index_of(column)?;
        raw.fields
            .get(index)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(headers: &[&str]) -> RowValidator {
        RowValidator::new(ColumnMap::from_headers(headers.iter().copied()).expect("header"))
    }

    fn raw(row: usize, fields: &[&str]) -> RawRow {
        RawRow {
            row,
            line: row as u64 + 1,
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }

    #[test]
    fn maps_fields_by_header_and_blanks_to_none() {
        let validator = validator(&["location", "name", "asset_tag", "note", "status"]);
        let record = validator
            .validate(&raw(1, &[" Shelf A ", "HDMI Cable", "A-001", "  ", "Loaned"]))
            .expect("valid row");

        assert_eq!(
            record,
            EquipmentRecord::new("A-001", "HDMI Cable")
                .with_location("Shelf A")
                .with_status(AssetStatus::Loaned)
        );
    }

    #[test]
    fn short_rows_are_padded_and_report_missing_fields() {
        let validator = validator(&["asset_tag", "name", "category"]);
        let rejected = validator.validate(&raw(4, &["A-009"])).unwrap_err();
        assert_eq!(rejected.row, 4);
        assert_eq!(rejected.line, 5);
        assert_eq!(rejected.reason, "missing required field `name`");

        let rejected = validator.validate(&raw(5, &["", " "])).unwrap_err();
        assert_eq!(
            rejected.reason,
            "missing required fields `asset_tag`, `name`"
        );

        assert!(validator.validate(&raw(6, &["A-010", "Mouse"])).is_ok());
    }

    #[test]
    fn rejects_unknown_status_and_overlong_rows() {
        let validator = validator(&["asset_tag", "name", "status"]);
        let rejected = validator
            .validate(&raw(2, &["A-001", "Projector", "lost"]))
            .unwrap_err();
        assert!(rejected.reason.contains("unknown status value `lost`"));

        let rejected = validator
            .validate(&raw(3, &["A-002", "Projector", "", "surprise"]))
            .unwrap_err();
        assert_eq!(rejected.reason, "expected 3 fields, found 4");

        assert!(validator
            .validate(&raw(4, &["A-003", "Projector", "", ""]))
            .is_ok());
    }

    #[test]
    fn rejection_display_carries_position() {
        let rejected = RowRejected {
            row: 7,
            line: 9,
            reason: "missing required field `name`".to_string(),
        };
        assert_eq!(
            rejected.to_string(),
            "row 7 (line 9): missing required field `name`"
        );
    }
}
