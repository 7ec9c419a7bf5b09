use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::task;

use crate::config::IndexerConfig;
use crate::persist::write_json;
use crate::progress::ProgressSink;
use crate::spatial;

/// The stages of one feed update run, in order. Every stage boundary is
/// an abort checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Init,
    Staging,
    Acquiring,
    Extracting,
    Indexing,
    Publishing,
    Done,
}

/// Retrieves the feed archive into the working directory and returns
/// its path. Implementations live outside this crate (an HTTP download,
/// a file already on disk, a test stub).
pub trait FeedAcquirer: Send + Sync {
    fn acquire(&self, dest_dir: &Path) -> Result<PathBuf>;
}

/// Unpacks the archive's tables into the working directory.
pub trait FeedExtractor: Send + Sync {
    fn extract(&self, archive: &Path, into: &Path) -> Result<()>;
}

/// Orchestrates one feed update: stage a scratch directory, acquire and
/// extract the archive, build both indices, publish them atomically,
/// clean up. Any failure tears down the working directory and leaves
/// the previously published documents untouched.
pub struct FeedPipeline {
    config: IndexerConfig,
    acquirer: Arc<dyn FeedAcquirer>,
    extractor: Arc<dyn FeedExtractor>,
    sink: Arc<dyn ProgressSink>,
    abort: Arc<AtomicBool>,
}

impl FeedPipeline {
    pub fn new(
        config: IndexerConfig,
        acquirer: Arc<dyn FeedAcquirer>,
        extractor: Arc<dyn FeedExtractor>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            acquirer,
            extractor,
            sink,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A handle another task can flip to stop the run. The flag is
    /// checked at every stage boundary; an aborted run cleans up and
    /// never publishes.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// One full run. With `archive_prestaged`, acquisition and
    /// extraction are skipped and the tables are expected to already
    /// sit in the working directory.
    pub async fn run(&self, archive_prestaged: bool) -> Result<()> {
        match self.run_stages(archive_prestaged).await {
            Ok(()) => {
                self.sink.info("GTFS feed update complete.");
                Ok(())
            }
            Err(err) => {
                self.sink
                    .error(&format!("GTFS feed update failed: {err:#}"));
                if let Err(cleanup_err) = remove_dir_if_present(&self.config.working_dir) {
                    warn!("cleanup after a failed run also failed: {cleanup_err:#}");
                }
                Err(err)
            }
        }
    }

    async fn run_stages(&self, archive_prestaged: bool) -> Result<()> {
        self.enter(Stage::Init)?;

        self.enter(Stage::Staging)?;
        if archive_prestaged {
            // The caller already put the tables in place; keep them.
            fs::create_dir_all(&self.config.working_dir)?;
            self.sink
                .debug("Archive already staged; skipping acquisition and extraction.");
        } else {
            remove_dir_if_present(&self.config.working_dir)?;
            fs::create_dir_all(&self.config.working_dir)?;

            self.enter(Stage::Acquiring)?;
            let archive = {
                let acquirer = self.acquirer.clone();
                let dir = self.config.working_dir.clone();
                task::spawn_blocking(move || acquirer.acquire(&dir)).await??
            };

            self.enter(Stage::Extracting)?;
            let extractor = self.extractor.clone();
            let dir = self.config.working_dir.clone();
            task::spawn_blocking(move || extractor.extract(&archive, &dir)).await??;
        }

        self.enter(Stage::Indexing)?;
        let schedule_task = {
            let config = self.config.clone();
            let staged = config.staged_path(&config.schedule_index_path)?;
            let sink = self.sink.clone();
            task::spawn_blocking(move || -> Result<()> {
                sink.info("Indexing the GTFS schedule data.");
                let index = gtfs::build_schedule_index(
                    &config.working_dir,
                    config.trip_key_mutator.as_ref(),
                    config.index_stop_times,
                )?;
                sink.debug("Writing the indexed GTFS schedule data to disk.");
                write_json(&staged, &index)
            })
        };
        let schedule = async {
            match schedule_task.await {
                Ok(result) => result,
                Err(err) => Err(anyhow!("schedule indexing task failed: {err}")),
            }
        };
        tokio::try_join!(schedule, spatial::run(&self.config, self.sink.clone()))?;

        self.enter(Stage::Publishing)?;
        self.publish(&self.config.schedule_index_path)?;
        self.publish(&self.config.spatial_index_path)?;
        if self.config.log_statistics {
            self.publish(&self.config.statistics_path)?;
        }

        self.enter(Stage::Done)?;
        remove_dir_if_present(&self.config.working_dir)?;
        Ok(())
    }

    fn enter(&self, stage: Stage) -> Result<()> {
        if self.abort.load(Ordering::SeqCst) {
            bail!("run aborted before the {stage:?} stage");
        }
        let message = match stage {
            Stage::Init => "Starting a GTFS feed update.",
            Stage::Staging => "Staging the working directory.",
            Stage::Acquiring => "Retrieving the GTFS feed archive.",
            Stage::Extracting => "Extracting the GTFS feed archive.",
            Stage::Indexing => "Indexing the GTFS data.",
            Stage::Publishing => "Publishing the GTFS indices.",
            Stage::Done => "Finished indexing; cleaning up.",
        };
        self.sink.info(message);
        Ok(())
    }

    /// Moves a staged document from the working directory to its
    /// durable destination: copy to a hidden sibling, then rename into
    /// place. Readers only ever see the old document or the new one.
    fn publish(&self, output: &Path) -> Result<()> {
        let staged = self.config.staged_path(output)?;
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        // validate() already rejected outputs with no file name.
        let name = output
            .file_name()
            .ok_or_else(|| anyhow!("output path {output:?} has no file name"))?;
        let mut tmp_name = OsString::from(".");
        tmp_name.push(name);
        tmp_name.push(".tmp");
        let tmp = dir.join(tmp_name);

        fs::copy(&staged, &tmp)
            .map_err(|err| anyhow!("{} -> {}: {err}", staged.display(), tmp.display()))?;
        fs::rename(&tmp, output)
            .map_err(|err| anyhow!("{} -> {}: {err}", tmp.display(), output.display()))?;
        Ok(())
    }
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|err| anyhow!("{}: {err}", dir.display()))?;
    }
    Ok(())
}
