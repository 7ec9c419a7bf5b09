use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use geo::Point;
use gtfs::trip_key;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::config::IndexerConfig;
use crate::fit::{fit_stops_to_path, FitKind, FitReport, TripProjections};
use crate::persist::{open_optional, write_json};
use crate::progress::ProgressSink;
use crate::shapes::{self, ShapePoint};
use crate::stats::IndexingStatistics;

/// The durable spatial document: shape polylines, the memo table of
/// per-trip stop projections, and the trip key -> memo entry mapping.
#[derive(Serialize)]
pub struct SpatialIndex {
    pub shapes: BTreeMap<String, Vec<ShapePoint>>,
    #[serde(rename = "stopProjectionsTable")]
    pub stop_projections_table: Vec<TripProjections>,
    #[serde(rename = "tripKeyToProjectionsTableIndex")]
    pub trip_key_to_projections_table_index: BTreeMap<String, usize>,
}

pub struct SpatialBuildOutput {
    pub index: SpatialIndex,
    pub statistics: IndexingStatistics,
}

/// The fitting problem a trip poses. A composite key with value
/// equality: two trips match only if both the shape and the full
/// ordered stop list match, no matter what characters the ids contain.
#[derive(Clone, PartialEq, Eq, Hash)]
struct StopPatternKey {
    shape_id: String,
    stop_ids: Vec<String>,
}

struct Job {
    key: StopPatternKey,
    stop_coords: Vec<Point<f64>>,
    /// The first trip that posed this problem, for statistics.
    trip_id: String,
}

struct Assignment {
    trip_id: String,
    trip_key: String,
    job: usize,
}

/// Builds the spatial index: parses the four input tables concurrently,
/// then fits every distinct (stop pattern, shape) pair in parallel and
/// merges the results in deterministic first-seen order. Trips sharing
/// a pattern reuse the memoized record.
pub async fn build_spatial_index(
    config: &IndexerConfig,
    sink: Arc<dyn ProgressSink>,
) -> Result<SpatialBuildOutput> {
    sink.info("Indexing the GTFS spatial data.");
    let dir = &config.working_dir;

    let shapes_task = {
        let path = dir.join("shapes.txt");
        let sink = sink.clone();
        task::spawn_blocking(move || {
            sink.debug("Reading shapes.txt");
            match open_optional(&path)? {
                Some(file) => {
                    shapes::load(file).map_err(|err| anyhow!("{}: {err}", path.display()))
                }
                None => Ok(BTreeMap::new()),
            }
        })
    };
    let trips_task = {
        let path = dir.join("trips.txt");
        let sink = sink.clone();
        task::spawn_blocking(move || {
            sink.debug("Reading trips.txt");
            match open_optional(&path)? {
                Some(file) => {
                    load_trip_shapes(file).map_err(|err| anyhow!("{}: {err}", path.display()))
                }
                None => Ok(Vec::new()),
            }
        })
    };
    let stop_times_task = {
        let path = dir.join("stop_times.txt");
        let sink = sink.clone();
        task::spawn_blocking(move || {
            sink.debug("Reading stop_times.txt");
            match open_optional(&path)? {
                Some(file) => {
                    load_trip_stop_ids(file).map_err(|err| anyhow!("{}: {err}", path.display()))
                }
                None => Ok(BTreeMap::new()),
            }
        })
    };
    let stops_task = {
        let path = dir.join("stops.txt");
        let sink = sink.clone();
        task::spawn_blocking(move || {
            sink.debug("Reading stops.txt");
            match open_optional(&path)? {
                Some(file) => {
                    load_stop_coords(file).map_err(|err| anyhow!("{}: {err}", path.display()))
                }
                None => Ok(BTreeMap::new()),
            }
        })
    };

    // Each parse returns its own result; this is the only join point.
    let (shapes, trips, trip_stops, stop_coords) =
        tokio::try_join!(shapes_task, trips_task, stop_times_task, stops_task)?;
    let (shapes, trips, trip_stops, stop_coords) = (shapes?, trips?, trip_stops?, stop_coords?);

    let mutator = config.trip_key_mutator.as_ref();
    let mut statistics = IndexingStatistics::default();
    let mut jobs: Vec<Job> = Vec::new();
    let mut job_by_key: HashMap<StopPatternKey, usize> = HashMap::new();
    let mut assignments: Vec<Assignment> = Vec::new();

    for (trip_id, shape_id) in &trips {
        let key = trip_key(mutator, trip_id);
        let Some(shape_id) = shape_id else {
            // Some trips just don't have a shape.
            statistics.trips_without_projections.push(trip_id.clone());
            continue;
        };
        if !shapes.contains_key(shape_id) {
            statistics.trips_without_projections.push(trip_id.clone());
            continue;
        }
        let stop_ids: &[String] = trip_stops.get(trip_id).map(Vec::as_slice).unwrap_or(&[]);
        let mut coords = Vec::with_capacity(stop_ids.len());
        let mut unknown_stop = false;
        for stop_id in stop_ids {
            match stop_coords.get(stop_id) {
                Some(&(lat, lon)) => coords.push(Point::new(lon, lat)),
                None => {
                    warn!("trip {trip_id} visits stop {stop_id}, which has no coordinates");
                    unknown_stop = true;
                    break;
                }
            }
        }
        if unknown_stop || coords.is_empty() {
            statistics.trips_without_projections.push(trip_id.clone());
            continue;
        }

        let pattern = StopPatternKey {
            shape_id: shape_id.clone(),
            stop_ids: stop_ids.to_vec(),
        };
        let job = match job_by_key.get(&pattern) {
            Some(&existing) => existing,
            None => {
                let next = jobs.len();
                job_by_key.insert(pattern.clone(), next);
                jobs.push(Job {
                    key: pattern,
                    stop_coords: coords,
                    trip_id: trip_id.clone(),
                });
                next
            }
        };
        assignments.push(Assignment {
            trip_id: trip_id.clone(),
            trip_key: key,
            job,
        });
    }

    // The fits are CPU-bound and independent, so they run on the rayon
    // pool; the results come back in job order, and a single writer
    // below assigns memo table indices.
    sink.debug("Fitting stops to shape paths.");
    let threshold = config.anomaly_threshold_ft;
    let (shapes, jobs, reports) = task::spawn_blocking(move || {
        let reports: Vec<FitReport> = jobs
            .par_iter()
            .map(|job| {
                fit_stops_to_path(
                    &job.key.stop_ids,
                    &job.stop_coords,
                    &shapes[&job.key.shape_id],
                    &job.key.shape_id,
                    threshold,
                )
            })
            .collect();
        (shapes, jobs, reports)
    })
    .await?;

    let mut index = SpatialIndex {
        shapes,
        stop_projections_table: Vec::new(),
        trip_key_to_projections_table_index: BTreeMap::new(),
    };
    let mut memo_index: Vec<Option<usize>> = Vec::with_capacity(jobs.len());
    for (job, report) in jobs.iter().zip(&reports) {
        match &report.projections {
            Some(projections) => {
                memo_index.push(Some(index.stop_projections_table.len()));
                index.stop_projections_table.push(projections.clone());
            }
            None => memo_index.push(None),
        }
        match report.kind {
            FitKind::Simple => statistics.summary_statistics.simple_fitting_cases += 1,
            FitKind::LeastSquares => {
                statistics.summary_statistics.least_squares_cases += 1;
                statistics.trips_requiring_regression.push(job.trip_id.clone());
            }
            FitKind::Unfit => {}
        }
        for (stop_id, anomaly) in &report.anomalies {
            statistics
                .trips_with_anomalies
                .entry(job.trip_id.clone())
                .or_default()
                .insert(stop_id.clone(), anomaly.clone());
        }
    }
    for assignment in assignments {
        match memo_index[assignment.job] {
            Some(table_index) => {
                index
                    .trip_key_to_projections_table_index
                    .insert(assignment.trip_key, table_index);
            }
            None => statistics.trips_without_projections.push(assignment.trip_id),
        }
    }

    sink.info("Completed indexing the GTFS spatial data.");
    Ok(SpatialBuildOutput { index, statistics })
}

/// Builds the spatial index and stages the document (and, when
/// configured, the statistics) in the working directory. The two writes
/// happen in parallel.
pub(crate) async fn run(config: &IndexerConfig, sink: Arc<dyn ProgressSink>) -> Result<()> {
    let SpatialBuildOutput { index, statistics } =
        build_spatial_index(config, sink.clone()).await?;

    let index_path = config.staged_path(&config.spatial_index_path)?;
    let write_index = {
        let sink = sink.clone();
        task::spawn_blocking(move || {
            sink.debug("Writing the indexed GTFS spatial data to disk.");
            write_json(&index_path, &index)
        })
    };

    if config.log_statistics {
        let stats_path = config.staged_path(&config.statistics_path)?;
        let write_stats = {
            let sink = sink.clone();
            task::spawn_blocking(move || {
                sink.debug("Writing the GTFS spatial data indexing statistics to disk.");
                write_json(&stats_path, &statistics)
            })
        };
        let (index_result, stats_result) = tokio::try_join!(write_index, write_stats)?;
        index_result?;
        stats_result?;
    } else {
        sink.info("GTFS spatial data indexing statistics not logged (by configuration).");
        write_index.await??;
    }
    Ok(())
}

fn load_trip_shapes<R: std::io::Read>(reader: R) -> Result<Vec<(String, Option<String>)>> {
    let mut trips = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: TripRecord = rec?;
        trips.push((rec.trip_id, rec.shape_id.filter(|s| !s.is_empty())));
    }
    Ok(trips)
}

/// trip_id -> stop_ids in the order the rows appear, which GTFS
/// promises is travel order.
fn load_trip_stop_ids<R: std::io::Read>(reader: R) -> Result<BTreeMap<String, Vec<String>>> {
    let mut stops_per_trip: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: StopTimeRecord = rec?;
        stops_per_trip.entry(rec.trip_id).or_default().push(rec.stop_id);
    }
    Ok(stops_per_trip)
}

fn load_stop_coords<R: std::io::Read>(reader: R) -> Result<BTreeMap<String, (f64, f64)>> {
    let mut coords = BTreeMap::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: StopRecord = rec?;
        coords.insert(rec.stop_id, (rec.stop_lat, rec.stop_lon));
    }
    Ok(coords)
}

#[derive(Deserialize)]
struct TripRecord {
    trip_id: String,
    shape_id: Option<String>,
}

#[derive(Deserialize)]
struct StopTimeRecord {
    trip_id: String,
    stop_id: String,
}

#[derive(Deserialize)]
struct StopRecord {
    stop_id: String,
    stop_lat: f64,
    stop_lon: f64,
}
