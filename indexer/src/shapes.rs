use std::collections::BTreeMap;

use anyhow::Result;
use geo::Point;
use serde::{Deserialize, Serialize};

use crate::geometry::distance_km;

/// One waypoint of a shape polyline, annotated with the running
/// haversine distance (km) from the start of its path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapePoint {
    pub latitude: f64,
    pub longitude: f64,
    pub dist_traveled: f64,
}

impl ShapePoint {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Builds shape_id -> polyline from shapes.txt rows. Rows for a shape
/// are expected in shape_pt_sequence order; a sequence decrease starts
/// that shape's path over at distance zero.
pub fn load<R: std::io::Read>(reader: R) -> Result<BTreeMap<String, Vec<ShapePoint>>> {
    let mut paths: BTreeMap<String, Vec<ShapePoint>> = BTreeMap::new();
    let mut last_seq: BTreeMap<String, usize> = BTreeMap::new();

    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        let restart = match last_seq.get(&rec.shape_id) {
            Some(last) => rec.shape_pt_sequence < *last,
            None => false,
        };

        let path = paths.entry(rec.shape_id.clone()).or_default();
        if restart {
            path.clear();
        }
        let pt = Point::new(rec.shape_pt_lon, rec.shape_pt_lat);
        let dist_traveled = match path.last() {
            Some(prev) => prev.dist_traveled + distance_km(prev.point(), pt),
            None => 0.0,
        };
        path.push(ShapePoint {
            latitude: rec.shape_pt_lat,
            longitude: rec.shape_pt_lon,
            dist_traveled,
        });
        last_seq.insert(rec.shape_id, rec.shape_pt_sequence);
    }

    Ok(paths)
}

#[derive(Deserialize)]
struct Record {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: usize,
}
