use crate::loader::LoadPhase;
use equip_core::RowRejected;
use equip_storage::WipeReport;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WipeSummary {
    pub loans: usize,
    pub assets: usize,
    pub categories: usize,
    pub locations: usize,
}

impl From<WipeReport> for WipeSummary {
    fn from(report: WipeReport) -> Self {
        Self {
            loans: report.loans,
            assets: report.assets,
            categories: report.categories,
            locations: report.locations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub encoding: String,
    pub delimiter: char,
}

/// Terminal report of one loader invocation, produced on success and on
/// failure alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub phase: LoadPhase,
    pub dry_run: bool,
    pub wiped: Option<WipeSummary>,
    pub source: Option<SourceInfo>,
    pub rows_read: usize,
    pub inserted: usize,
    pub updated: usize,
    pub categories_created: usize,
    pub locations_created: usize,
    pub rejected: Vec<RowRejected>,
}

impl LoadSummary {
    pub(crate) fn new(dry_run: bool) -> Self {
        Self {
            phase: LoadPhase::Idle,
            dry_run,
            wiped: None,
            source: None,
            rows_read: 0,
            inserted: 0,
            updated: 0,
            categories_created: 0,
            locations_created: 0,
            rejected: Vec::new(),
        }
    }

    pub fn accepted(&self) -> usize {
        self.rows_read - self.rejected.len()
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "phase: {}", self.phase)?;
        if self.dry_run {
            writeln!(f, "dry run: no changes written")?;
        }
        if let Some(wiped) = &self.wiped {
            writeln!(
                f,
                "wiped: assets={} loans={} categories={} locations={}",
                wiped.assets, wiped.loans, wiped.categories, wiped.locations
            )?;
        }
        let Some(source) = &self.source else {
            return Ok(());
        };
        writeln!(
            f,
            "source: {} (encoding={}, delimiter={:?})",
            source.path.display(),
            source.encoding,
            source.delimiter
        )?;
        writeln!(f, "rows read: {}", self.rows_read)?;
        writeln!(f, "inserted: {}", self.inserted)?;
        writeln!(f, "updated: {}", self.updated)?;
        writeln!(
            f,
            "masters created: categories={} locations={}",
            self.categories_created, self.locations_created
        )?;
        writeln!(f, "rejected: {}", self.rejected.len())?;
        for rejected in &self.rejected {
            writeln!(f, "  - {rejected}")?;
        }
        Ok(())
    }
}
