use std::collections::BTreeMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::rows::{load_rows, Row};
use crate::stop_times::{load_stop_times, StopTimesTable};
use crate::trip_key::{trip_key, TripKeyMutator};

/// Primary key column per schedule table, in parse order.
const TABLES: [(&str, &str); 5] = [
    ("agency", "agency_id"),
    ("calendar", "service_id"),
    ("routes", "route_id"),
    ("stops", "stop_id"),
    ("trips", "trip_id"),
];

/// The durable schedule document: each table keyed by its primary key,
/// trips keyed by trip key. Rebuilt wholesale every run; readers treat
/// it as immutable until the next full rebuild replaces it.
#[derive(Debug, Default, Serialize)]
pub struct ScheduleIndex {
    #[serde(flatten)]
    pub tables: BTreeMap<String, BTreeMap<String, Row>>,
    #[serde(rename = "stop_times", skip_serializing_if = "Option::is_none")]
    pub stop_times: Option<StopTimesTable>,
}

impl ScheduleIndex {
    pub fn table(&self, name: &str) -> Option<&BTreeMap<String, Row>> {
        self.tables.get(name)
    }
}

/// Parses every schedule table found in `dir`. A missing file just
/// leaves that table out; a file that fails to parse structurally is
/// fatal. stop_times is by far the largest table, so indexing it is
/// optional.
pub fn build_schedule_index(
    dir: &Path,
    mutator: Option<&TripKeyMutator>,
    index_stop_times: bool,
) -> Result<ScheduleIndex> {
    let mut index = ScheduleIndex::default();

    for (table, pk) in TABLES {
        let path = dir.join(format!("{table}.txt"));
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("{} is missing; leaving {table} out of the schedule index", path.display());
                continue;
            }
            Err(err) => return Err(anyhow!("{}: {err}", path.display())),
        };
        let rows = load_rows(file).map_err(|err| anyhow!("{}: {err}", path.display()))?;
        let keyed = if table == "trips" {
            index_rows(table, rows, pk, |id| trip_key(mutator, id))
        } else {
            index_rows(table, rows, pk, |id| id.to_string())
        };
        index.tables.insert(table.to_string(), keyed);
    }

    if index_stop_times {
        let path = dir.join("stop_times.txt");
        match File::open(&path) {
            Ok(file) => {
                let stop_times = load_stop_times(file, mutator)
                    .map_err(|err| anyhow!("{}: {err}", path.display()))?;
                index.stop_times = Some(stop_times);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("{} is missing; leaving stop_times out of the schedule index", path.display());
            }
            Err(err) => return Err(anyhow!("{}: {err}", path.display())),
        }
    }

    Ok(index)
}

fn index_rows(
    table: &str,
    rows: Vec<Row>,
    pk: &str,
    key_fn: impl Fn(&str) -> String,
) -> BTreeMap<String, Row> {
    let mut keyed = BTreeMap::new();
    for row in rows {
        match row.get(pk) {
            Some(value) if !value.is_empty() => {
                let key = key_fn(value);
                let value = value.to_string();
                if keyed.insert(key, row).is_some() {
                    warn!("{table} has more than one row keyed {pk}={value:?}; the later row wins");
                }
            }
            _ => {
                warn!("{table} row with no {pk}; skipping it");
            }
        }
    }
    keyed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_table(dir: &Path, name: &str, contents: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    fn fixture_dir() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        write_table(
            dir,
            "agency.txt",
            "agency_id,agency_name,agency_timezone\nMTA,Metropolitan,America/New_York\n",
        );
        write_table(
            dir,
            "routes.txt",
            "route_id,agency_id,route_short_name\nB62,MTA,62\n",
        );
        write_table(dir, "stops.txt", "stop_id,stop_name,stop_lat,stop_lon\ns1,First,40.7,-73.9\n");
        write_table(
            dir,
            "trips.txt",
            "route_id,service_id,trip_id,shape_id\nB62,WKD,CS_t1,sh1\n",
        );
        write_table(
            dir,
            "stop_times.txt",
            "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
             CS_t1,08:00:00,08:00:30,s1,1\n",
        );
        tmp
    }

    #[test]
    fn indexes_tables_by_primary_key() {
        let tmp = fixture_dir();
        let index = build_schedule_index(tmp.path(), None, true).unwrap();
        assert_eq!(
            index.table("routes").unwrap()["B62"]["route_short_name"],
            "62"
        );
        assert_eq!(index.table("trips").unwrap()["CS_t1"]["shape_id"], "sh1");
        // calendar.txt doesn't exist, so the table is absent, not empty.
        assert!(index.table("calendar").is_none());
    }

    #[test]
    fn trip_key_mutator_rekeys_trips_and_stop_times() {
        let tmp = fixture_dir();
        let mutator = TripKeyMutator::new("^CS_", "").unwrap();
        let index = build_schedule_index(tmp.path(), Some(&mutator), true).unwrap();
        let trips = index.table("trips").unwrap();
        assert!(trips.contains_key("t1"));
        // The row itself keeps the full original trip_id.
        assert_eq!(trips["t1"]["trip_id"], "CS_t1");
        assert!(index.stop_times.as_ref().unwrap().contains_key("t1"));
    }

    #[test]
    fn stop_times_round_trip_by_key_and_sequence() {
        let tmp = fixture_dir();
        let index = build_schedule_index(tmp.path(), None, true).unwrap();
        let visit = index.stop_times.as_ref().unwrap()["CS_t1"].visit(1).unwrap();
        assert_eq!(visit.arrival_time.as_deref(), Some("08:00:00"));
        assert_eq!(visit.departure_time.as_deref(), Some("08:00:30"));
    }

    #[test]
    fn stop_times_skipped_unless_requested() {
        let tmp = fixture_dir();
        let index = build_schedule_index(tmp.path(), None, false).unwrap();
        assert!(index.stop_times.is_none());
        // It also stays out of the serialized document.
        let json = serde_json::to_string(&index).unwrap();
        assert!(!json.contains("stop_times"));
    }

    #[test]
    fn row_missing_primary_key_is_skipped() {
        let tmp = fixture_dir();
        write_table(
            tmp.path(),
            "routes.txt",
            "route_id,agency_id,route_short_name\nB62,MTA,62\n,MTA,63\n",
        );
        let index = build_schedule_index(tmp.path(), None, false).unwrap();
        assert_eq!(index.table("routes").unwrap().len(), 1);
    }
}
