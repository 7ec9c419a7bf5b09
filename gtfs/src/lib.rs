#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod rows;
mod schedule;
mod stop_times;
mod trip_key;

pub use rows::{load_rows, Row};
pub use schedule::{build_schedule_index, ScheduleIndex};
pub use stop_times::{load_stop_times, StopTimesTable, StopVisit, TripStopTimes};
pub use trip_key::{trip_key, TripKeyMutator};
