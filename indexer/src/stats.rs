use std::collections::BTreeMap;

use serde::Serialize;

/// Feed-quality signals gathered while building the spatial index.
/// Advisory only; persisted alongside the index when configured.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexingStatistics {
    #[serde(rename = "summaryStatistics")]
    pub summary_statistics: SummaryStatistics,
    /// trip_id -> stop_id -> the offending projection.
    #[serde(rename = "tripsWithAnomalies")]
    pub trips_with_anomalies: BTreeMap<String, BTreeMap<String, StopAnomaly>>,
    /// Trips with no shape, an unresolvable shape, no stops, or no
    /// feasible monotonic assignment.
    #[serde(rename = "tripsWithoutProjections")]
    pub trips_without_projections: Vec<String>,
    #[serde(rename = "tripsRequiringRegression")]
    pub trips_requiring_regression: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SummaryStatistics {
    #[serde(rename = "simpleFittingCases")]
    pub simple_fitting_cases: usize,
    #[serde(rename = "leastSquaresCases")]
    pub least_squares_cases: usize,
}

/// A stop whose snapped position sits suspiciously far from its raw
/// feed coordinates.
#[derive(Clone, Debug, Serialize)]
pub struct StopAnomaly {
    #[serde(rename = "deviationInFt")]
    pub deviation_in_ft: f64,
    /// [longitude, latitude]
    pub stop_coords: [f64; 2],
    pub snapped_coords: [f64; 2],
}
