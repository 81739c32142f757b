use crate::source::{CsvSource, SourceOptions};
use crate::summary::{LoadSummary, SourceInfo};
use crate::LoadError;
use equip_core::{ColumnMap, RowValidator};
use equip_storage::EquipStore;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Rejections beyond this many are only listed in the summary.
const LOGGED_REJECTIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Idle,
    Wiping,
    Reading,
    Validating,
    Writing,
    Done,
    Failed,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPhase::Idle => "idle",
            LoadPhase::Wiping => "wiping",
            LoadPhase::Reading => "reading",
            LoadPhase::Validating => "validating",
            LoadPhase::Writing => "writing",
            LoadPhase::Done => "done",
            LoadPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadPhase::Done | LoadPhase::Failed)
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadRequest {
    /// Empty the tables before anything else; valid without a CSV.
    pub wipe: bool,
    pub csv: Option<PathBuf>,
    /// Read and validate only; neither the wipe nor the write touches the store.
    pub dry_run: bool,
}

#[derive(Debug, Error)]
#[error("{error}")]
pub struct LoadFailure {
    pub error: LoadError,
    pub summary: LoadSummary,
}

/// Drives one invocation: optional wipe, then read, validate and write a CSV
/// batch. Owns the store for its whole lifetime.
pub struct Loader {
    store: EquipStore,
    options: SourceOptions,
    phase: LoadPhase,
}

impl Loader {
    pub fn new(store: EquipStore, options: SourceOptions) -> Self {
        Self {
            store,
            options,
            phase: LoadPhase::Idle,
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn store(&self) -> &EquipStore {
        &self.store
    }

    pub fn into_store(self) -> EquipStore {
        self.store
    }

    pub fn run(&mut self, request: &LoadRequest) -> Result<LoadSummary, LoadFailure> {
        self.phase = LoadPhase::Idle;
        let mut summary = LoadSummary::new(request.dry_run);

        match self.execute(request, &mut summary) {
            Ok(()) => {
                self.enter(LoadPhase::Done);
                summary.phase = LoadPhase::Done;
                info!(
                    rows_read = summary.rows_read,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    rejected = summary.rejected.len(),
                    "load finished"
                );
                Ok(summary)
            }
            Err(error) => {
                let failed_in = self.phase;
                self.enter(LoadPhase::Failed);
                summary.phase = LoadPhase::Failed;
                error!(phase = %failed_in, kind = error.kind(), "load failed: {error}");
                Err(LoadFailure { error, summary })
            }
        }
    }

    fn enter(&mut self, next: LoadPhase) {
        debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }

    fn execute(
        &mut self,
        request: &LoadRequest,
        summary: &mut LoadSummary,
    ) -> Result<(), LoadError> {
        if request.wipe {
            if request.dry_run {
                info!("dry run: skipping wipe");
            } else {
                self.enter(LoadPhase::Wiping);
                let report = self.store.wipe()?;
                info!(
                    assets = report.assets,
                    loans = report.loans,
                    categories = report.categories,
                    locations = report.locations,
                    "wipe committed"
                );
                summary.wiped = Some(report.into());
            }
        }

        let Some(path) = request.csv.as_deref() else {
            if !request.wipe {
                warn!("nothing to do: neither a wipe nor a CSV was requested");
            }
            return Ok(());
        };

        self.enter(LoadPhase::Reading);
        let source = CsvSource::open(path, &self.options)?;
        summary.source = Some(SourceInfo {
            path: path.to_path_buf(),
            encoding: source.encoding().name().to_string(),
            delimiter: char::from(source.delimiter()),
        });
        info!(
            path = %path.display(),
            encoding = source.encoding().name(),
            "reading CSV"
        );

        let columns = ColumnMap::from_headers(source.headers().iter().map(String::as_str))
            .map_err(|reason| LoadError::HeaderInvalid {
                path: path.to_path_buf(),
                reason,
            })?;
        for ignored in columns.ignored() {
            debug!(header = %ignored, "ignoring unrecognised column");
        }
        let validator = RowValidator::new(columns);

        self.enter(LoadPhase::Validating);
        let mut batch = Vec::new();
        for raw in source.rows() {
            let raw = raw?;
            summary.rows_read += 1;
            match validator.validate(&raw) {
                Ok(record) => batch.push(record),
                Err(rejected) => {
                    if summary.rejected.len() < LOGGED_REJECTIONS {
                        warn!(
                            row = rejected.row,
                            line = rejected.line,
                            "row rejected: {}",
                            rejected.reason
                        );
                    }
                    summary.rejected.push(rejected);
                }
            }
        }
        if summary.rejected.len() > LOGGED_REJECTIONS {
            warn!(
                "{} further rejected rows are listed in the summary only",
                summary.rejected.len() - LOGGED_REJECTIONS
            );
        }

        if batch.is_empty() {
            return Err(LoadError::EmptyBatch {
                path: path.to_path_buf(),
                rejected: summary.rejected.len(),
            });
        }

        if request.dry_run {
            info!(valid = batch.len(), "dry run: skipping write");
            return Ok(());
        }

        self.enter(LoadPhase::Writing);
        let report = self.store.load(&batch)?;
        summary.inserted = report.inserted;
        summary.updated = report.updated;
        summary.categories_created = report.categories_created;
        summary.locations_created = report.locations_created;
        info!(
            categories_created = report.categories_created,
            locations_created = report.locations_created,
            "batch committed"
        );

        Ok(())
    }
}
