#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod config;
mod fit;
mod geometry;
mod persist;
mod pipeline;
mod progress;
mod shapes;
mod spatial;
mod stats;

pub use config::{IndexerConfig, DEFAULT_ANOMALY_THRESHOLD_FT};
pub use fit::{fit_stops_to_path, FitKind, FitReport, StopProjection, TripProjections};
pub use pipeline::{FeedAcquirer, FeedExtractor, FeedPipeline, Stage};
pub use progress::{Level, LogSink, ProgressEvent, ProgressSink};
pub use shapes::ShapePoint;
pub use spatial::{build_spatial_index, SpatialBuildOutput, SpatialIndex};
pub use stats::{IndexingStatistics, StopAnomaly, SummaryStatistics};
