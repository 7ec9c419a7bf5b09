use std::fs::File;
use std::io::{BufWriter, ErrorKind};
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

/// Opens a table file, treating "not found" as an empty table rather
/// than a failure. Any other I/O error is fatal.
pub fn open_optional(path: &Path) -> Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("{} is missing; treating it as empty", path.display());
            Ok(None)
        }
        Err(err) => Err(anyhow!("{}: {err}", path.display())),
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|err| anyhow!("{}: {err}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), value)
        .map_err(|err| anyhow!("{}: {err}", path.display()))?;
    Ok(())
}
