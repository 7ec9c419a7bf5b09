use std::collections::BTreeMap;

use anyhow::Result;

/// One record of a delimited table. The schema is whatever the feed
/// declares in the header row; values stay unparsed strings.
pub type Row = BTreeMap<String, String>;

pub fn load_rows<R: std::io::Read>(reader: R) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Row = rec?;
        rows.push(rec);
    }
    Ok(rows)
}
