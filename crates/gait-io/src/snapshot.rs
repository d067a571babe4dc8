//! Effective configuration snapshot written next to each subject's results.

use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use gait_core::{Error, Result, SubjectConfig};

pub const SNAPSHOT_FILENAME: &str = "config.json";

pub fn write_snapshot(dir: impl AsRef<Path>, config: &SubjectConfig) -> Result<()> {
    let path = dir.as_ref().join(SNAPSHOT_FILENAME);
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, &config.snapshot()?)?;
    Ok(())
}

/// Read a snapshot as a key/value map; the group stage never writes it back
pub fn read_snapshot(dir: impl AsRef<Path>) -> Result<Map<String, Value>> {
    let path = dir.as_ref().join(SNAPSHOT_FILENAME);
    let file = File::open(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::InputMissing(format!(
            "configuration snapshot {} not found",
            path.display()
        )),
        _ => Error::Io(e),
    })?;

    match serde_json::from_reader(file)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Serialization(format!(
            "{} does not hold a JSON object",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = SubjectConfig {
            bin_num: 40,
            hind_joints: vec!["Hip".into()],
            ..SubjectConfig::default()
        };
        write_snapshot(dir.path(), &config).unwrap();

        let map = read_snapshot(dir.path()).unwrap();
        assert_eq!(map["bin_num"], Value::from(40));
        assert_eq!(map["hind_joints"], serde_json::json!(["Hip"]));

        let back: SubjectConfig = serde_json::from_value(Value::Object(map)).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read_snapshot(dir.path()), Err(Error::InputMissing(_))));
    }
}
