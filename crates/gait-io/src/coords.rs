//! Coordinate file readers.

use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;

use gait_core::{ColumnKey, CoordFrame, Dimensionality, Error, Result};

use crate::csv_error;

/// Parse one cell; blank cells are missing tracks
fn parse_cell(cell: &str, column: &str, row: usize) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>().map_err(|_| {
        Error::IoFormat(format!(
            "value {cell:?} in column {column:?} (row {row}) is not a number; \
             check that the file uses '.' as decimal separator"
        ))
    })
}

/// Read a 2D tracker CSV (`scorer` / `bodyparts` / `coords` header rows).
pub fn read_tracker_csv(path: impl AsRef<Path>, sampling_rate: u32) -> Result<CoordFrame> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::InputMissing(format!("{}: file not found", path.display()))
        }
        _ => Error::Io(e),
    })?;
    parse_tracker_csv(file, sampling_rate)
}

/// Parse tracker CSV content.
///
/// The optional leading `scorer` row is skipped; the next two rows give the
/// body part and coordinate of each column, which collapse into
/// `"<bodypart> <coord>"`. The first column is a frame index and is dropped.
pub fn parse_tracker_csv<R: Read>(reader: R, sampling_rate: u32) -> Result<CoordFrame> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = reader.records();
    let mut next_row = || -> Result<Option<Vec<String>>> {
        match records.next() {
            Some(r) => Ok(Some(
                r.map_err(|e| csv_error("tracker file", e))?
                    .iter()
                    .map(str::to_string)
                    .collect(),
            )),
            None => Ok(None),
        }
    };

    let mut bodyparts = next_row()?
        .ok_or_else(|| Error::IoFormat("tracker file is empty".into()))?;
    if bodyparts
        .first()
        .is_some_and(|c| c.trim().eq_ignore_ascii_case("scorer"))
    {
        bodyparts = next_row()?
            .ok_or_else(|| Error::IoFormat("tracker file has no bodyparts row".into()))?;
    }
    let coords = next_row()?
        .ok_or_else(|| Error::IoFormat("tracker file has no coords row".into()))?;

    let mut keys = Vec::new();
    for (part, coord) in bodyparts.iter().zip(&coords).skip(1) {
        let header = format!("{} {}", part.trim(), coord.trim());
        let key = ColumnKey::parse_coordinate(&header, Dimensionality::TwoD).ok_or_else(|| {
            Error::IoFormat(format!("unrecognised tracker column {header:?}"))
        })?;
        keys.push((header, key));
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); keys.len()];
    let mut row = 0;
    while let Some(record) = next_row()? {
        row += 1;
        for (j, (header, _)) in keys.iter().enumerate() {
            let cell = record.get(j + 1).map(String::as_str).unwrap_or("");
            columns[j].push(parse_cell(cell, header, row)?);
        }
    }

    let frame = CoordFrame::from_columns(
        Dimensionality::TwoD,
        sampling_rate,
        keys.into_iter().map(|(_, k)| k).zip(columns).collect(),
    )?;
    tracing::debug!(rows = frame.len(), columns = frame.keys().len(), "Parsed tracker CSV");
    Ok(frame)
}

/// Pose tracks of a multi-animal tracker, `frames × nodes × coords × tracks`
#[derive(Debug, Clone)]
pub struct TrackTensor {
    pub frames: usize,
    pub nodes: usize,
    /// Coordinate order is x, y
    pub coords: usize,
    pub tracks: usize,
    /// Row-major data
    pub data: Vec<f64>,
    pub node_names: Vec<String>,
}

impl TrackTensor {
    fn at(&self, frame: usize, node: usize, coord: usize, track: usize) -> f64 {
        self.data[((frame * self.nodes + node) * self.coords + coord) * self.tracks + track]
    }

    /// Flatten track 0 into `"<node> x"`, `"<node> y"` columns
    pub fn flatten(&self, sampling_rate: u32) -> Result<CoordFrame> {
        let expected = self.frames * self.nodes * self.coords * self.tracks;
        if self.data.len() != expected {
            return Err(Error::IoFormat(format!(
                "track tensor holds {} values, shape implies {}",
                self.data.len(),
                expected
            )));
        }
        if self.node_names.len() != self.nodes {
            return Err(Error::IoFormat(format!(
                "{} node names for {} nodes",
                self.node_names.len(),
                self.nodes
            )));
        }
        if self.coords < 2 || self.tracks < 1 {
            return Err(Error::IoFormat(
                "track tensor needs x and y coordinates and at least one track".into(),
            ));
        }

        let mut columns = Vec::with_capacity(self.nodes * 2);
        for (node, name) in self.node_names.iter().enumerate() {
            for (c, suffix) in ["x", "y"].iter().enumerate() {
                let header = format!("{} {}", name.trim(), suffix);
                let key = ColumnKey::parse_coordinate(&header, Dimensionality::TwoD)
                    .ok_or_else(|| Error::IoFormat(format!("invalid node name {name:?}")))?;
                let values = (0..self.frames).map(|f| self.at(f, node, c, 0)).collect();
                columns.push((key, values));
            }
        }

        CoordFrame::from_columns(Dimensionality::TwoD, sampling_rate, columns)
    }
}

/// Read a 3D coordinate table stored as CSV.
pub fn read_3d_csv(path: impl AsRef<Path>, sampling_rate: u32) -> Result<CoordFrame> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::InputMissing(format!("{}: file not found", path.display()))
        }
        _ => Error::Io(e),
    })?;
    parse_3d_csv(file, sampling_rate)
}

/// Parse a 3D coordinate table.
///
/// A `Time` column (any capitalization) is accepted and replaced by the
/// exact frame time. When the first two rows both carry `Time = 0`, the
/// second one is the true start and the first is dropped. Columns that are
/// not coordinates are ignored.
pub fn parse_3d_csv<R: Read>(reader: R, sampling_rate: u32) -> Result<CoordFrame> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error("3D table", e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let time_idx = headers.iter().position(|h| h.eq_ignore_ascii_case("time"));
    let mut keys = Vec::new();
    for (j, header) in headers.iter().enumerate() {
        if Some(j) == time_idx {
            continue;
        }
        match ColumnKey::parse_coordinate(header, Dimensionality::ThreeD) {
            Some(key) => keys.push((j, header.clone(), key)),
            None => tracing::debug!(column = %header, "Ignoring non-coordinate column"),
        }
    }

    let mut time = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); keys.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error("3D table", e))?;
        if let Some(t) = time_idx {
            time.push(parse_cell(record.get(t).unwrap_or(""), "Time", row + 1)?);
        }
        for (slot, (j, header, _)) in keys.iter().enumerate() {
            columns[slot].push(parse_cell(record.get(*j).unwrap_or(""), header, row + 1)?);
        }
    }

    let mut frame = CoordFrame::from_columns(
        Dimensionality::ThreeD,
        sampling_rate,
        keys.into_iter().map(|(_, _, k)| k).zip(columns).collect(),
    )?;

    if time.len() >= 2 && time[0] == 0.0 && time[1] == 0.0 {
        frame.drop_leading_rows(1);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gait_core::{Coord, Joint, Side};

    const TRACKER: &str = "\
scorer,DLC,DLC,DLC,DLC,DLC,DLC
bodyparts,Hip,Hip,Hip,Knee,Knee,Knee
coords,x,y,likelihood,x,y,likelihood
0,1.0,2.0,0.99,3.0,4.0,0.98
1,1.5,2.5,0.97,3.5,,0.50
";

    #[test]
    fn test_parse_tracker_csv() {
        let frame = parse_tracker_csv(TRACKER.as_bytes(), 100).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.keys().len(), 6);

        let hip_x = frame.coordinate(&Joint::central("Hip"), Coord::X).unwrap();
        assert_eq!(hip_x, &[1.0, 1.5]);
        let knee_y = frame.coordinate(&Joint::central("Knee"), Coord::Y).unwrap();
        assert!(knee_y[1].is_nan());
        let lik = frame.coordinate(&Joint::central("Knee"), Coord::Likelihood).unwrap();
        assert_eq!(lik, &[0.98, 0.50]);
    }

    #[test]
    fn test_tracker_rejects_locale_decimals() {
        let bad = "bodyparts,Hip\ncoords,x\n0,\"1,5\"\n";
        let err = parse_tracker_csv(bad.as_bytes(), 100).unwrap_err();
        assert!(matches!(err, Error::IoFormat(_)));
        assert!(err.to_string().contains("decimal separator"));
    }

    #[test]
    fn test_flatten_track_zero() {
        // 2 frames, 1 node, 2 coords, 2 tracks
        let tensor = TrackTensor {
            frames: 2,
            nodes: 1,
            coords: 2,
            tracks: 2,
            data: vec![1.0, 100.0, 2.0, 200.0, 3.0, 300.0, 4.0, 400.0],
            node_names: vec!["Nose".into()],
        };
        let frame = tensor.flatten(50).unwrap();
        assert_eq!(frame.coordinate(&Joint::central("Nose"), Coord::X).unwrap(), &[1.0, 3.0]);
        assert_eq!(frame.coordinate(&Joint::central("Nose"), Coord::Y).unwrap(), &[2.0, 4.0]);
    }

    #[test]
    fn test_flatten_rejects_bad_shape() {
        let tensor = TrackTensor {
            frames: 2,
            nodes: 1,
            coords: 2,
            tracks: 1,
            data: vec![1.0],
            node_names: vec!["Nose".into()],
        };
        assert!(tensor.flatten(50).is_err());
    }

    #[test]
    fn test_parse_3d_table_with_duplicate_start() {
        let content = "\
TIME,\"Knee, left Y\",\"Knee, left Z\",Pelvis Y,Frame
0,0.1,0.2,1.0,x
0,0.3,0.4,1.1,x
0.01,0.5,0.6,1.2,x
";
        let frame = parse_3d_csv(content.as_bytes(), 100).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.time(), &[0.0, 0.01]);
        let knee = frame
            .coordinate(&Joint::lateral("Knee", Side::Left), Coord::Y)
            .unwrap();
        assert_eq!(knee, &[0.3, 0.5]);
        assert!(frame.coordinate(&Joint::central("Pelvis"), Coord::Y).is_some());
    }
}
