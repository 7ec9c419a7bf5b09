use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use gtfs::TripKeyMutator;

/// How many feet a stop may sit from its snapped position on the path
/// before it's reported as a feed-quality anomaly.
pub const DEFAULT_ANOMALY_THRESHOLD_FT: f64 = 5.0;

/// Everything one indexing run needs. Assembled by the caller;
/// CLI/config-file loading lives outside this crate.
#[derive(Clone)]
pub struct IndexerConfig {
    /// Scratch directory for the extracted feed and staged outputs.
    /// Created on demand, removed when the run ends.
    pub working_dir: PathBuf,
    /// Durable destinations for the three output documents.
    pub schedule_index_path: PathBuf,
    pub spatial_index_path: PathBuf,
    pub statistics_path: PathBuf,
    pub trip_key_mutator: Option<TripKeyMutator>,
    /// stop_times is by far the largest table; indexing it is optional.
    pub index_stop_times: bool,
    pub log_statistics: bool,
    pub anomaly_threshold_ft: f64,
}

impl IndexerConfig {
    /// Fatal configuration errors, caught before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.working_dir.as_os_str().is_empty() {
            bail!("a working directory is required");
        }
        let mut file_names = BTreeSet::new();
        for (what, path) in [
            ("schedule index", &self.schedule_index_path),
            ("spatial index", &self.spatial_index_path),
            ("statistics", &self.statistics_path),
        ] {
            match path.file_name() {
                Some(name) => {
                    if !file_names.insert(name.to_os_string()) {
                        bail!("the {what} output path repeats the file name {name:?}");
                    }
                }
                None => bail!("the {what} output path {path:?} has no file name"),
            }
        }
        if !self.anomaly_threshold_ft.is_finite() || self.anomaly_threshold_ft < 0.0 {
            bail!(
                "anomaly threshold must be a non-negative number of feet, not {}",
                self.anomaly_threshold_ft
            );
        }
        Ok(())
    }

    /// Where an output document is staged inside the working directory
    /// before publication.
    pub(crate) fn staged_path(&self, output: &Path) -> Result<PathBuf> {
        match output.file_name() {
            Some(name) => Ok(self.working_dir.join(name)),
            None => Err(anyhow!("output path {output:?} has no file name")),
        }
    }
}
