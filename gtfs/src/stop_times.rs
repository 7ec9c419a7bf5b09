use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::trip_key::{trip_key, TripKeyMutator};

/// One scheduled stop within a trip. Times keep the exact strings from
/// the feed. `next_stop` is the sequence number of the visit that
/// follows this one in travel order, skipping any holes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopVisit {
    pub stop_id: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    #[serde(rename = "nextStop")]
    pub next_stop: Option<usize>,
}

/// Stop times for one trip, addressable by GTFS stop_sequence. The
/// sequence table is sparse; holes are None.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TripStopTimes {
    #[serde(rename = "stopInfoBySequenceNumber")]
    pub stop_info_by_sequence_number: Vec<Option<StopVisit>>,
    /// Each stop_id maps to the sequence numbers at which the trip
    /// visits it, in travel order.
    #[serde(rename = "stopIdToSequenceNumbersTable")]
    pub stop_id_to_sequence_numbers: BTreeMap<String, Vec<usize>>,
}

impl TripStopTimes {
    pub fn visit(&self, sequence: usize) -> Option<&StopVisit> {
        self.stop_info_by_sequence_number.get(sequence)?.as_ref()
    }
}

pub type StopTimesTable = BTreeMap<String, TripStopTimes>;

// Sequence numbers index straight into the dense per-trip table;
// anything this large is feed corruption, not a real trip.
const MAX_SEQUENCE: usize = 1_000_000;

/// Restructures stop_times rows into per-trip, sequence-indexed, linked
/// tables. One linear pass in table order: `next_stop` linkage follows
/// the order rows appear in the file, not a re-sort, so it is only
/// correct if the feed lists each trip's rows in travel order (a GTFS
/// invariant we assume).
pub fn load_stop_times<R: std::io::Read>(
    reader: R,
    mutator: Option<&TripKeyMutator>,
) -> Result<StopTimesTable> {
    let mut table: StopTimesTable = BTreeMap::new();
    // The sequence number of the visit most recently created per trip.
    let mut last_created: BTreeMap<String, usize> = BTreeMap::new();

    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        let key = trip_key(mutator, &rec.trip_id);
        let trip = table.entry(key.clone()).or_default();

        let seq = match rec.stop_sequence.trim().parse::<usize>() {
            Ok(seq) if seq <= MAX_SEQUENCE => seq,
            _ => {
                // Data anomaly, but keep the row: append it at the first
                // free index past the current end.
                let appended = trip.stop_info_by_sequence_number.len();
                warn!(
                    "stop_times row for trip {} has unusable stop_sequence {:?}; keeping it at sequence {}",
                    rec.trip_id, rec.stop_sequence, appended
                );
                appended
            }
        };

        if trip.stop_info_by_sequence_number.len() <= seq {
            trip.stop_info_by_sequence_number.resize(seq + 1, None);
        }
        if trip.stop_info_by_sequence_number[seq].is_some() {
            warn!(
                "trip {} repeats stop_sequence {}; the later row wins",
                rec.trip_id, seq
            );
        }
        trip.stop_info_by_sequence_number[seq] = Some(StopVisit {
            stop_id: rec.stop_id.clone(),
            arrival_time: rec.arrival_time,
            departure_time: rec.departure_time,
            next_stop: None,
        });
        trip.stop_id_to_sequence_numbers
            .entry(rec.stop_id)
            .or_default()
            .push(seq);

        if let Some(prev) = last_created.get(&key) {
            if let Some(Some(visit)) = trip.stop_info_by_sequence_number.get_mut(*prev) {
                visit.next_stop = Some(seq);
            }
        }
        last_created.insert(key, seq);
    }

    Ok(table)
}

#[derive(Deserialize)]
struct Record {
    trip_id: String,
    arrival_time: Option<String>,
    departure_time: Option<String>,
    stop_id: String,
    stop_sequence: String,
}
