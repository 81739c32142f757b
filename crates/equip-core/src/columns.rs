use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Logical columns of an equipment import file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    AssetTag,
    Name,
    Category,
    Location,
    Note,
    Status,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::AssetTag,
        Column::Name,
        Column::Category,
        Column::Location,
        Column::Note,
        Column::Status,
    ];

    pub const REQUIRED: [Column; 2] = [Column::AssetTag, Column::Name];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::AssetTag => "asset_tag",
            Column::Name => "name",
            Column::Category => "category",
            Column::Location => "location",
            Column::Note => "note",
            Column::Status => "status",
        }
    }

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    fn slot(&self) -> usize {
        match self {
            Column::AssetTag => 0,
            Column::Name => 1,
            Column::Category => 2,
            Column::Location => 3,
            Column::Note => 4,
            Column::Status => 5,
        }
    }

    /// Resolves a raw header cell, accepting the English and Japanese labels
    /// produced by the spreadsheets this loader is fed.
    pub fn from_header(raw: &str) -> Option<Self> {
        let trimmed = raw.trim_start_matches('\u{feff}').trim();
        match trimmed {
            "名前" | "備品名" => return Some(Column::Name),
            "管理番号" | "資産番号" => return Some(Column::AssetTag),
            "カテゴリ" | "分類" => return Some(Column::Category),
            "場所" | "保管場所" => return Some(Column::Location),
            "メモ" | "備考" => return Some(Column::Note),
            "状態" | "ステータス" => return Some(Column::Status),
            _ => {}
        }
        match trimmed.to_lowercase().as_str() {
            "name" => Some(Column::Name),
            "asset_tag" | "assettag" | "asset tag" | "tag" => Some(Column::AssetTag),
            "category" => Some(Column::Category),
            "location" => Some(Column::Location),
            "note" | "notes" => Some(Column::Note),
            "status" => Some(Column::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("CSV header not found")]
    Empty,
    #[error("column `{column}` appears twice (fields {first} and {second})")]
    Duplicate {
        column: Column,
        first: usize,
        second: usize,
    },
    #[error("required column `{0}` is missing from the header")]
    MissingRequired(Column),
}

/// Header-derived lookup from logical column to field index, built once per
/// file before any data row is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    indices: [Option<usize>; 6],
    width: usize,
    ignored: Vec<String>,
}

impl ColumnMap {
    pub fn from_headers<'a, I>(headers: I) -> Result<Self, HeaderError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut indices = [None; 6];
        let mut ignored = Vec::new();
        let mut width = 0;
        let mut any_label = false;

        for (index, raw) in headers.into_iter().enumerate() {
            width = index + 1;
            if !raw.trim_start_matches('\u{feff}').trim().is_empty() {
                any_label = true;
            }
            let Some(column) = Column::from_header(raw) else {
                ignored.push(raw.trim().to_string());
                continue;
            };
            let slot = &mut indices[column.slot()];
            if let Some(first) = *slot {
                return Err(HeaderError::Duplicate {
                    column,
                    first: first + 1,
                    second: index + 1,
                });
            }
            *slot = Some(index);
        }

        if !any_label {
            return Err(HeaderError::Empty);
        }

        for column in Column::REQUIRED {
            if indices[column.slot()].is_none() {
                return Err(HeaderError::MissingRequired(column));
            }
        }

        Ok(Self {
            indices,
            width,
            ignored,
        })
    }

    pub fn index_of(&self, column: Column) -> Option<usize> {
        self.indices[column.slot()]
    }

    /// Number of fields in the header row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Header labels that did not resolve to a known column.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn columns(&self) -> impl Iterator<Item = Column> + '_ {
        Column::ALL
            .into_iter()
            .filter(|column| self.index_of(*column).is_some())
    }
}
