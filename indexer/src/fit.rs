use std::collections::BTreeMap;

use geo::Point;
use serde::Serialize;

use crate::geometry::project_onto_segment;
use crate::shapes::ShapePoint;
use crate::stats::StopAnomaly;

const FEET_PER_KM: f64 = 3280.84;

/// A stop snapped onto one segment of its trip's shape.
#[derive(Clone, Debug, Serialize)]
pub struct StopProjection {
    #[serde(rename = "segmentNum")]
    pub segment_num: usize,
    pub stop_id: String,
    /// [longitude, latitude], straight from the feed.
    pub stop_coords: [f64; 2],
    pub snapped_coords: [f64; 2],
    pub snapped_dist_along_km: f64,
    /// Perpendicular offset in km.
    pub deviation: f64,
    pub previous_stop_id: Option<String>,
}

/// Every stop projection for one trip, plus trip-level metadata. Trips
/// sharing a stop pattern and shape share one of these.
#[derive(Clone, Debug, Serialize)]
pub struct TripProjections {
    #[serde(flatten)]
    pub stops: BTreeMap<String, StopProjection>,
    #[serde(rename = "__originStopID")]
    pub origin_stop_id: Option<String>,
    #[serde(rename = "__destinationStopID")]
    pub destination_stop_id: Option<String>,
    #[serde(rename = "__shapeID")]
    pub shape_id: String,
}

impl TripProjections {
    /// Stops in travel order, reconstructed from the previous-stop
    /// links.
    pub fn travel_order(&self) -> Vec<&StopProjection> {
        let mut by_previous: BTreeMap<Option<&str>, &StopProjection> = BTreeMap::new();
        for projection in self.stops.values() {
            by_previous.insert(projection.previous_stop_id.as_deref(), projection);
        }
        let mut ordered = Vec::with_capacity(self.stops.len());
        let mut current = by_previous.get(&None).copied();
        while let Some(projection) = current {
            ordered.push(projection);
            current = by_previous.get(&Some(projection.stop_id.as_str())).copied();
        }
        ordered
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitKind {
    /// Independent per-stop minimization already satisfied the
    /// no-backtracking constraint.
    Simple,
    /// The DP fallback ran, whether or not a feasible assignment came
    /// out of it.
    LeastSquares,
    /// The fitter had nothing to work with: no stops, or fewer than
    /// two waypoints.
    Unfit,
}

pub struct FitReport {
    pub projections: Option<TripProjections>,
    pub kind: FitKind,
    /// Stops whose final deviation exceeded the anomaly threshold.
    pub anomalies: Vec<(String, StopAnomaly)>,
}

impl FitReport {
    fn unfit() -> Self {
        Self {
            projections: None,
            kind: FitKind::Unfit,
            anomalies: Vec::new(),
        }
    }
}

/// One cell of the candidate table: stop s snapped onto segment w.
struct Candidate {
    segment_num: usize,
    snapped: Point<f64>,
    snapped_dist_along_km: f64,
    deviation: f64,
}

/// Fits one trip's stops onto its shape, producing a single canonical
/// along-path position per stop such that positions never decrease in
/// travel order (a vehicle never travels backward along its shape).
///
/// Tries independent per-stop minimization first; if that breaks
/// monotonicity, falls back to a DP that minimizes total squared
/// deviation subject to the constraint. O(S*W) for the fast path,
/// O(S*W^2) for the fallback. (The fallback could be O(S*W*lgW) with a
/// range-minimum structure over each row, but feeds haven't needed it.)
pub fn fit_stops_to_path(
    stop_ids: &[String],
    stop_coords: &[Point<f64>],
    waypoints: &[ShapePoint],
    shape_id: &str,
    anomaly_threshold_ft: f64,
) -> FitReport {
    if stop_ids.is_empty() || stop_ids.len() != stop_coords.len() || waypoints.len() < 2 {
        return FitReport::unfit();
    }

    let table: Vec<Vec<Candidate>> = stop_coords
        .iter()
        .map(|&stop| {
            waypoints
                .windows(2)
                .enumerate()
                .map(|(segment_num, seg)| {
                    let proj = project_onto_segment(stop, seg[0].point(), seg[1].point());
                    Candidate {
                        segment_num,
                        snapped: proj.snapped,
                        snapped_dist_along_km: seg[0].dist_traveled + proj.along_km,
                        deviation: proj.deviation_km,
                    }
                })
                .collect()
        })
        .collect();

    let (picks, kind) = match try_simple_minification(&table) {
        Some(picks) => (picks, FitKind::Simple),
        None => match fit_with_least_squares(&table) {
            Some(picks) => (picks, FitKind::LeastSquares),
            // The DP ran and found no monotonic assignment; the trip
            // gets no projection but still counts as a fallback case.
            None => {
                return FitReport {
                    projections: None,
                    kind: FitKind::LeastSquares,
                    anomalies: Vec::new(),
                }
            }
        },
    };

    let mut stops = BTreeMap::new();
    let mut anomalies = Vec::new();
    let mut previous_stop_id: Option<String> = None;
    for (i, cand) in picks.iter().enumerate() {
        let stop_id = stop_ids[i].clone();
        let stop = stop_coords[i];
        let stop_coords_arr = [stop.x(), stop.y()];
        let snapped_coords = [cand.snapped.x(), cand.snapped.y()];

        let deviation_in_ft = cand.deviation * FEET_PER_KM;
        if deviation_in_ft > anomaly_threshold_ft {
            anomalies.push((
                stop_id.clone(),
                StopAnomaly {
                    deviation_in_ft,
                    stop_coords: stop_coords_arr,
                    snapped_coords,
                },
            ));
        }

        let projection = StopProjection {
            segment_num: cand.segment_num,
            stop_id: stop_id.clone(),
            stop_coords: stop_coords_arr,
            snapped_coords,
            snapped_dist_along_km: cand.snapped_dist_along_km,
            deviation: cand.deviation,
            previous_stop_id: previous_stop_id.clone(),
        };
        previous_stop_id = Some(stop_id.clone());
        stops.insert(stop_id, projection);
    }

    FitReport {
        projections: Some(TripProjections {
            stops,
            origin_stop_id: stop_ids.first().cloned(),
            destination_stop_id: stop_ids.last().cloned(),
            shape_id: shape_id.to_string(),
        }),
        kind,
        anomalies,
    }
}

/// Per stop, independently take the candidate with the smallest
/// deviation (along-path distance breaks ties). Valid only if the
/// result is already monotonic.
fn try_simple_minification(table: &[Vec<Candidate>]) -> Option<Vec<&Candidate>> {
    let picks: Vec<&Candidate> = table
        .iter()
        .map(|row| {
            // Rows are never empty; the caller checked the shape has at
            // least one segment.
            row.iter()
                .min_by(|a, b| {
                    a.deviation
                        .total_cmp(&b.deviation)
                        .then(a.snapped_dist_along_km.total_cmp(&b.snapped_dist_along_km))
                })
                .unwrap()
        })
        .collect();

    let monotonic = picks
        .windows(2)
        .all(|pair| pair[0].snapped_dist_along_km <= pair[1].snapped_dist_along_km);
    if monotonic {
        Some(picks)
    } else {
        None
    }
}

/// Minimum total squared deviation subject to non-decreasing along-path
/// positions. cost(s, w) = deviation(s, w)^2 + min over feasible w' of
/// cost(s-1, w'); the answer is rebuilt from parent pointers starting
/// at the cheapest cell of the last stop's row.
fn fit_with_least_squares(table: &[Vec<Candidate>]) -> Option<Vec<&Candidate>> {
    let stops = table.len();
    let width = table[0].len();

    let mut cost = vec![vec![f64::INFINITY; width]; stops];
    let mut parent = vec![vec![usize::MAX; width]; stops];
    for (w, cell) in table[0].iter().enumerate() {
        cost[0][w] = cell.deviation * cell.deviation;
    }

    for s in 1..stops {
        for (w, cell) in table[s].iter().enumerate() {
            let mut best = f64::INFINITY;
            let mut best_from = usize::MAX;
            for (prev_w, prev_cell) in table[s - 1].iter().enumerate() {
                if prev_cell.snapped_dist_along_km <= cell.snapped_dist_along_km
                    && cost[s - 1][prev_w] < best
                {
                    best = cost[s - 1][prev_w];
                    best_from = prev_w;
                }
            }
            if best.is_finite() {
                cost[s][w] = best + cell.deviation * cell.deviation;
                parent[s][w] = best_from;
            }
        }
    }

    let (last_w, total) = cost[stops - 1]
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    if !total.is_finite() {
        return None;
    }

    let mut assignment = vec![0; stops];
    assignment[stops - 1] = last_w;
    for s in (1..stops).rev() {
        assignment[s - 1] = parent[s][assignment[s]];
    }
    Some(
        assignment
            .iter()
            .enumerate()
            .map(|(s, &w)| &table[s][w])
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const KM_IN_DEG: f64 = 0.009;

    /// A straight 4-waypoint shape along the equator, 1 km between
    /// waypoints.
    fn straight_shape() -> Vec<ShapePoint> {
        (0..4)
            .map(|i| ShapePoint {
                latitude: 0.0,
                longitude: i as f64 * KM_IN_DEG,
                dist_traveled: crate::geometry::distance_km(
                    Point::new(0.0, 0.0),
                    Point::new(i as f64 * KM_IN_DEG, 0.0),
                ),
            })
            .collect()
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn ordered_distances(projections: &TripProjections) -> Vec<f64> {
        projections
            .travel_order()
            .iter()
            .map(|p| p.snapped_dist_along_km)
            .collect()
    }

    /// Exhaustive minimum over all monotonic segment assignments, for
    /// checking the DP on small tables.
    fn brute_force_cost(
        stop_coords: &[Point<f64>],
        waypoints: &[ShapePoint],
    ) -> Option<f64> {
        let segments = waypoints.len() - 1;
        let stops = stop_coords.len();
        let candidates: Vec<Vec<(f64, f64)>> = stop_coords
            .iter()
            .map(|&stop| {
                waypoints
                    .windows(2)
                    .map(|seg| {
                        let proj = project_onto_segment(stop, seg[0].point(), seg[1].point());
                        (seg[0].dist_traveled + proj.along_km, proj.deviation_km)
                    })
                    .collect()
            })
            .collect();

        let mut best: Option<f64> = None;
        let mut assignment = vec![0usize; stops];
        loop {
            let monotonic = (1..stops).all(|s| {
                candidates[s - 1][assignment[s - 1]].0 <= candidates[s][assignment[s]].0
            });
            if monotonic {
                let total: f64 = (0..stops)
                    .map(|s| candidates[s][assignment[s]].1.powi(2))
                    .sum();
                if best.map_or(true, |b| total < b) {
                    best = Some(total);
                }
            }
            // Next assignment, odometer-style.
            let mut s = 0;
            loop {
                if s == stops {
                    return best;
                }
                assignment[s] += 1;
                if assignment[s] < segments {
                    break;
                }
                assignment[s] = 0;
                s += 1;
            }
        }
    }

    #[test]
    fn clean_trip_takes_the_fast_path() {
        let shape = straight_shape();
        let coords = vec![
            Point::new(0.1 * KM_IN_DEG, 0.0),
            Point::new(1.5 * KM_IN_DEG, 0.0),
            Point::new(2.9 * KM_IN_DEG, 0.0),
        ];
        let report = fit_stops_to_path(&ids(&["a", "b", "c"]), &coords, &shape, "sh1", 5.0);
        assert_eq!(report.kind, FitKind::Simple);
        let projections = report.projections.unwrap();
        let dists = ordered_distances(&projections);
        assert!(dists.windows(2).all(|p| p[0] <= p[1]));
        assert_relative_eq!(dists[0], 0.1, max_relative = 0.02);
        assert_relative_eq!(dists[1], 1.5, max_relative = 0.02);
        assert_relative_eq!(dists[2], 2.9, max_relative = 0.02);
        assert_eq!(projections.origin_stop_id.as_deref(), Some("a"));
        assert_eq!(projections.destination_stop_id.as_deref(), Some("c"));
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn noisy_stop_forces_the_dp_fallback() {
        let shape = straight_shape();
        // Stop b's raw coordinates sit 2 km off the path, behind its
        // start; its independent best snap lands at km 0, before stop a
        // at km 0.1, so the fast path is non-monotonic.
        let coords = vec![
            Point::new(0.1 * KM_IN_DEG, 0.0),
            Point::new(-0.3 * KM_IN_DEG, 2.0 * KM_IN_DEG),
            Point::new(0.9 * KM_IN_DEG, 0.0),
        ];
        let report = fit_stops_to_path(&ids(&["a", "b", "c"]), &coords, &shape, "sh1", 5.0);
        assert_eq!(report.kind, FitKind::LeastSquares);

        let projections = report.projections.unwrap();
        let dists = ordered_distances(&projections);
        assert_eq!(dists.len(), 3);
        assert!(dists.windows(2).all(|p| p[0] <= p[1]), "{dists:?}");
        assert_relative_eq!(dists[0], 0.1, max_relative = 0.05);
        assert!(dists[1] >= dists[0]);
        assert!(dists[2] >= 0.9 - 0.05);

        // The DP's total squared deviation matches brute force over the
        // whole candidate table.
        let dp_cost: f64 = projections
            .stops
            .values()
            .map(|p| p.deviation.powi(2))
            .sum();
        let brute = brute_force_cost(&coords, &shape).unwrap();
        assert_relative_eq!(dp_cost, brute, max_relative = 1e-9);

        // 2 km off the path is well past any reasonable threshold.
        assert!(report.anomalies.iter().any(|(stop_id, _)| stop_id == "b"));
    }

    #[test]
    fn memoized_recomputation_is_identical() {
        let shape = straight_shape();
        let coords = vec![
            Point::new(0.2 * KM_IN_DEG, 0.0),
            Point::new(2.5 * KM_IN_DEG, 0.0),
        ];
        let a = fit_stops_to_path(&ids(&["x", "y"]), &coords, &shape, "sh1", 5.0);
        let b = fit_stops_to_path(&ids(&["x", "y"]), &coords, &shape, "sh1", 5.0);
        assert_eq!(
            serde_json::to_string(&a.projections.unwrap()).unwrap(),
            serde_json::to_string(&b.projections.unwrap()).unwrap()
        );
    }

    #[test]
    fn infeasible_assignment_still_counts_as_a_fallback() {
        // One segment only, stops in reverse order along it: a single
        // candidate per stop, and no monotonic assignment.
        let shape: Vec<ShapePoint> = straight_shape().into_iter().take(2).collect();
        let coords = vec![
            Point::new(0.9 * KM_IN_DEG, 0.0),
            Point::new(0.1 * KM_IN_DEG, 0.0),
        ];
        let report = fit_stops_to_path(&ids(&["a", "b"]), &coords, &shape, "sh1", 5.0);
        assert_eq!(report.kind, FitKind::LeastSquares);
        assert!(report.projections.is_none());
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn zero_stop_trip_is_unfit() {
        let shape = straight_shape();
        let report = fit_stops_to_path(&[], &[], &shape, "sh1", 5.0);
        assert_eq!(report.kind, FitKind::Unfit);
        assert!(report.projections.is_none());
    }

    #[test]
    fn single_waypoint_shape_is_unfit() {
        let shape = vec![ShapePoint {
            latitude: 0.0,
            longitude: 0.0,
            dist_traveled: 0.0,
        }];
        let report = fit_stops_to_path(
            &ids(&["a"]),
            &[Point::new(0.0, 0.0)],
            &shape,
            "sh1",
            5.0,
        );
        assert_eq!(report.kind, FitKind::Unfit);
    }
}
