use anyhow::Result;
use regex::Regex;

/// Rewrites trip_ids into the keys used by the output indices, to match
/// an external id convention. Pure and deterministic; the same trip_id
/// always yields the same key.
#[derive(Clone, Debug)]
pub struct TripKeyMutator {
    pattern: Regex,
    replacement: String,
}

impl TripKeyMutator {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    /// Replaces the first match only.
    pub fn apply(&self, trip_id: &str) -> String {
        self.pattern
            .replace(trip_id, self.replacement.as_str())
            .into_owned()
    }
}

/// The key a trip gets in the output indices: the trip_id itself, or
/// the mutator's rewrite of it.
pub fn trip_key(mutator: Option<&TripKeyMutator>, trip_id: &str) -> String {
    match mutator {
        Some(m) => m.apply(trip_id),
        None => trip_id.to_string(),
    }
}
