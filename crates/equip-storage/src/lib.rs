use chrono::{DateTime, SecondsFormat, Utc};
use equip_core::{AssetStatus, EquipmentRecord};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

pub const EQUIP_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to write asset `{asset_tag}`: {source}")]
    Record {
        asset_tag: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Rows removed by [`EquipStore::wipe`], per table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WipeReport {
    pub loans: usize,
    pub assets: usize,
    pub categories: usize,
    pub locations: usize,
}

impl WipeReport {
    pub fn total(&self) -> usize {
        self.loans + self.assets + self.categories + self.locations
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    pub updated: usize,
    pub categories_created: usize,
    pub locations_created: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub id: String,
    pub asset_tag: String,
    pub name: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub category_id: Option<String>,
    pub location_id: Option<String>,
    pub note: Option<String>,
    pub status: AssetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum MasterTable {
    Categories,
    Locations,
}

impl MasterTable {
    fn insert_sql(self) -> &'static str {
        match self {
            MasterTable::Categories => {
                "
                INSERT OR IGNORE INTO categories (id, name, sort_order, created_at, updated_at)
                VALUES (?1, ?2, 0, ?3, ?3)
                "
            }
            MasterTable::Locations => {
                "
                INSERT OR IGNORE INTO locations (id, name, sort_order, created_at, updated_at)
                VALUES (?1, ?2, 0, ?3, ?3)
                "
            }
        }
    }

    fn lookup_sql(self) -> &'static str {
        match self {
            MasterTable::Categories => "SELECT id FROM categories WHERE name = ?1",
            MasterTable::Locations => "SELECT id FROM locations WHERE name = ?1",
        }
    }

    fn names_sql(self) -> &'static str {
        match self {
            MasterTable::Categories => {
                "SELECT name FROM categories ORDER BY sort_order ASC, name ASC"
            }
            MasterTable::Locations => {
                "SELECT name FROM locations ORDER BY sort_order ASC, name ASC"
            }
        }
    }
}

const UPSERT_ASSET_SQL: &str = "
    INSERT INTO assets (
        id,
        name,
        asset_tag,
        category,
        location,
        category_id,
        location_id,
        note,
        status,
        created_at,
        updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, COALESCE(?9, 'available'), ?10, ?10)
    ON CONFLICT(asset_tag) DO UPDATE SET
        name=excluded.name,
        category=excluded.category,
        location=excluded.location,
        category_id=excluded.category_id,
        location_id=excluded.location_id,
        note=excluded.note,
        status=COALESCE(?9, assets.status),
        updated_at=excluded.updated_at
";

const SELECT_ASSET_COLUMNS: &str = "
    SELECT id, asset_tag, name, category, location, category_id, location_id, note,
           status, created_at, updated_at
    FROM assets
";

/// Handle over one equipment database file. The connection closes when the
/// store is dropped.
pub struct EquipStore {
    conn: Connection,
}

impl EquipStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.apply_pragmas()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.apply_pragmas()?;
        store.migrate()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> Result<(), StorageError> {
        // WAL lets readers keep seeing the last committed state while a load runs.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "temp_store", "MEMORY")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > EQUIP_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: EQUIP_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            // schema and version bump land together or not at all
            let tx = self.conn.unchecked_transaction()?;
            let sql = include_str!("../migrations/0001_equipment_schema.sql");
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", 1)?;
            tx.commit()?;
        }

        Ok(())
    }

    /// Empties loans, assets and both master tables in one transaction.
    /// Safe to call on an empty database.
    pub fn wipe(&mut self) -> Result<WipeReport, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        // children first so the loans -> assets foreign key never dangles
        let report = WipeReport {
            loans: tx.execute("DELETE FROM loans", [])?,
            assets: tx.execute("DELETE FROM assets", [])?,
            categories: tx.execute("DELETE FROM categories", [])?,
            locations: tx.execute("DELETE FROM locations", [])?,
        };

        tx.commit()?;
        Ok(report)
    }

    /// Upserts every record by `asset_tag` inside a single transaction and
    /// registers unseen category and location names in the master tables.
    ///
    /// The first failing statement aborts the call; the transaction is dropped
    /// uncommitted, so nothing from the batch becomes visible.
    pub fn load(&mut self, batch: &[EquipmentRecord]) -> Result<LoadReport, StorageError> {
        let now = now_timestamp();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let categories = distinct_names(batch.iter().map(|record| record.category.as_deref()));
        let locations = distinct_names(batch.iter().map(|record| record.location.as_deref()));

        let mut report = LoadReport {
            categories_created: sync_master(&tx, MasterTable::Categories, &categories, &now)?,
            locations_created: sync_master(&tx, MasterTable::Locations, &locations, &now)?,
            ..LoadReport::default()
        };
        let category_ids = master_ids(&tx, MasterTable::Categories, &categories)?;
        let location_ids = master_ids(&tx, MasterTable::Locations, &locations)?;

        {
            let mut exists = tx.prepare("SELECT 1 FROM assets WHERE asset_tag = ?1")?;
            let mut upsert = tx.prepare(UPSERT_ASSET_SQL)?;

            for record in batch {
                let record_err = |source| StorageError::Record {
                    asset_tag: record.asset_tag.clone(),
                    source,
                };
                let existed = exists.exists([&record.asset_tag]).map_err(record_err)?;
                let category_id = record
                    .category
                    .as_deref()
                    .and_then(|name| category_ids.get(name));
                let location_id = record
                    .location
                    .as_deref()
                    .and_then(|name| location_ids.get(name));

                upsert
                    .execute(params![
                        Uuid::new_v4().to_string(),
                        record.name,
                        record.asset_tag,
                        record.category,
                        record.location,
                        category_id,
                        location_id,
                        record.note,
                        record.status.map(|status| status.as_str()),
                        now,
                    ])
                    .map_err(record_err)?;

                if existed {
                    report.updated += 1;
                } else {
                    report.inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }

    pub fn asset_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?)
    }

    pub fn asset_by_tag(&self, asset_tag: &str) -> Result<Option<StoredAsset>, StorageError> {
        let sql = format!("{SELECT_ASSET_COLUMNS} WHERE asset_tag = ?1");
        let row = self
            .conn
            .query_row(&sql, [asset_tag], read_asset_row)
            .optional()?;
        row.map(StoredAsset::try_from).transpose()
    }

    /// Page through assets ordered by asset tag, the listing order of the UI.
    pub fn list_assets(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredAsset>, StorageError> {
        let sql = format!("{SELECT_ASSET_COLUMNS} ORDER BY asset_tag ASC LIMIT ?1 OFFSET ?2");
        let mut statement = self.conn.prepare(&sql)?;
        let limit = sql_int(limit, "limit")?;
        let offset = sql_int(offset, "offset")?;
        let rows = statement.query_map(params![limit, offset], read_asset_row)?;

        let mut assets = Vec::new();
        for row in rows {
            assets.push(StoredAsset::try_from(row?)?);
        }
        Ok(assets)
    }

    pub fn category_names(&self) -> Result<Vec<String>, StorageError> {
        self.master_names(MasterTable::Categories)
    }

    pub fn location_names(&self) -> Result<Vec<String>, StorageError> {
        self.master_names(MasterTable::Locations)
    }

    fn master_names(&self, table: MasterTable) -> Result<Vec<String>, StorageError> {
        let mut statement = self.conn.prepare(table.names_sql())?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

type AssetRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
);

fn read_asset_row(row: &Row<'_>) -> rusqlite::Result<AssetRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

impl TryFrom<AssetRow> for StoredAsset {
    type Error = StorageError;

    fn try_from(row: AssetRow) -> Result<Self, Self::Error> {
        let (
            id,
            asset_tag,
            name,
            category,
            location,
            category_id,
            location_id,
            note,
            status,
            created_at,
            updated_at,
        ) = row;
        let status = status
            .parse::<AssetStatus>()
            .map_err(StorageError::InvalidValue)?;

        Ok(StoredAsset {
            id,
            asset_tag,
            name,
            category,
            location,
            category_id,
            location_id,
            note,
            status,
            created_at: parse_timestamp(created_at)?,
            updated_at: parse_timestamp(updated_at)?,
        })
    }
}

fn distinct_names<'a>(values: impl Iterator<Item = Option<&'a str>>) -> BTreeSet<String> {
    values
        .flatten()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn sync_master(
    tx: &Transaction<'_>,
    table: MasterTable,
    names: &BTreeSet<String>,
    now: &str,
) -> Result<usize, StorageError> {
    let mut statement = tx.prepare(table.insert_sql())?;
    let mut created = 0;
    for name in names {
        created += statement.execute(params![Uuid::new_v4().to_string(), name, now])?;
    }
    Ok(created)
}

fn master_ids(
    tx: &Transaction<'_>,
    table: MasterTable,
    names: &BTreeSet<String>,
) -> Result<BTreeMap<String, String>, StorageError> {
    let mut statement = tx.prepare(table.lookup_sql())?;
    let mut ids = BTreeMap::new();
    for name in names {
        let id: Option<String> = statement
            .query_row([name], |row| row.get(0))
            .optional()?;
        if let Some(id) = id {
            ids.insert(name.clone(), id);
        }
    }
    Ok(ids)
}

fn sql_int(value: usize, what: &str) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidValue(format!("{what} {value} exceeds i64::MAX")))
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
