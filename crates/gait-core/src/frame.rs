//! Per-frame joint coordinate table.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{ColumnKey, Coord, Dimensionality, Joint};

/// Joint coordinates in capture order with an exact time axis.
///
/// Row `i` holds frame `first_frame + i`; its time is
/// `(first_frame + i) / sampling_rate`.
#[derive(Debug, Clone)]
pub struct CoordFrame {
    dim: Dimensionality,
    sampling_rate: u32,
    first_frame: usize,
    time: Vec<f64>,
    flipped: bool,
    keys: Vec<ColumnKey>,
    values: Vec<Vec<f64>>,
    lookup: HashMap<ColumnKey, usize>,
}

impl CoordFrame {
    /// Empty frame with `rows` frames starting at frame 0
    pub fn new(dim: Dimensionality, sampling_rate: u32, rows: usize) -> Self {
        Self::with_offset(dim, sampling_rate, 0, rows)
    }

    fn with_offset(dim: Dimensionality, sampling_rate: u32, first_frame: usize, rows: usize) -> Self {
        let rate = f64::from(sampling_rate.max(1));
        let time = (first_frame..first_frame + rows)
            .map(|frame| frame as f64 / rate)
            .collect();

        Self {
            dim,
            sampling_rate: sampling_rate.max(1),
            first_frame,
            time,
            flipped: false,
            keys: Vec::new(),
            values: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Build from columns of equal length
    pub fn from_columns(
        dim: Dimensionality,
        sampling_rate: u32,
        columns: Vec<(ColumnKey, Vec<f64>)>,
    ) -> Result<Self> {
        let rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut frame = Self::new(dim, sampling_rate, rows);
        for (key, values) in columns {
            if frame.lookup.contains_key(&key) {
                return Err(Error::InputAmbiguous(format!(
                    "column {} appears more than once",
                    key.display(dim)
                )));
            }
            frame.insert(key, values)?;
        }
        Ok(frame)
    }

    pub fn dim(&self) -> Dimensionality {
        self.dim
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn first_frame(&self) -> usize {
        self.first_frame
    }

    /// Last valid frame index, `None` when empty
    pub fn last_frame(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.first_frame + self.len() - 1)
    }

    pub fn contains_frame(&self, frame: usize) -> bool {
        frame >= self.first_frame && frame < self.first_frame + self.len()
    }

    /// Row position of a frame index
    pub fn row_of(&self, frame: usize) -> Option<usize> {
        self.contains_frame(frame).then(|| frame - self.first_frame)
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn flipped(&self) -> bool {
        self.flipped
    }

    pub fn set_flipped(&mut self, flipped: bool) {
        self.flipped = flipped;
    }

    pub fn keys(&self) -> &[ColumnKey] {
        &self.keys
    }

    pub fn contains(&self, key: &ColumnKey) -> bool {
        self.lookup.contains_key(key)
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&[f64]> {
        self.lookup.get(key).map(|&i| self.values[i].as_slice())
    }

    pub fn column_mut(&mut self, key: &ColumnKey) -> Option<&mut Vec<f64>> {
        match self.lookup.get(key) {
            Some(&i) => Some(&mut self.values[i]),
            None => None,
        }
    }

    /// Column lookup that fails with a diagnostic naming the column
    pub fn require(&self, key: &ColumnKey) -> Result<&[f64]> {
        self.column(key).ok_or_else(|| {
            Error::InputMissing(format!("column {} not found", key.display(self.dim)))
        })
    }

    /// Coordinate column of a joint
    pub fn coordinate(&self, joint: &Joint, coord: Coord) -> Option<&[f64]> {
        self.column(&ColumnKey::coordinate(joint.clone(), coord))
    }

    pub fn has_joint(&self, joint: &Joint) -> bool {
        self.dim
            .spatial_coords()
            .iter()
            .any(|&c| self.contains(&ColumnKey::coordinate(joint.clone(), c)))
    }

    /// Insert a new column or replace an existing one
    pub fn insert(&mut self, key: ColumnKey, values: Vec<f64>) -> Result<()> {
        if values.len() != self.len() {
            return Err(Error::IoFormat(format!(
                "column {} has {} rows, expected {}",
                key.display(self.dim),
                values.len(),
                self.len()
            )));
        }

        match self.lookup.get(&key) {
            Some(&i) => self.values[i] = values,
            None => {
                self.lookup.insert(key.clone(), self.keys.len());
                self.keys.push(key);
                self.values.push(values);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &ColumnKey) -> Option<Vec<f64>> {
        let idx = self.lookup.remove(key)?;
        self.keys.remove(idx);
        let values = self.values.remove(idx);
        for (i, k) in self.keys.iter().enumerate().skip(idx) {
            self.lookup.insert(k.clone(), i);
        }
        Some(values)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnKey, &[f64])> {
        self.keys.iter().zip(self.values.iter().map(Vec::as_slice))
    }

    /// Keys of all raw coordinate columns on one axis
    pub fn coordinate_keys(&self, coord: Coord) -> Vec<ColumnKey> {
        self.keys
            .iter()
            .filter(|k| k.coord() == Some(coord))
            .cloned()
            .collect()
    }

    /// Apply `f` to every value of the selected columns
    pub fn map_columns(&mut self, select: impl Fn(&ColumnKey) -> bool, f: impl Fn(f64) -> f64) {
        for (key, values) in self.keys.iter().zip(self.values.iter_mut()) {
            if select(key) {
                values.iter_mut().for_each(|v| *v = f(*v));
            }
        }
    }

    /// Distinct joints in column order
    pub fn joints(&self) -> Vec<Joint> {
        let mut joints: Vec<Joint> = Vec::new();
        for key in &self.keys {
            if let ColumnKey::Coordinate { joint, .. } = key {
                if !joints.contains(joint) {
                    joints.push(joint.clone());
                }
            }
        }
        joints
    }

    /// Inclusive frame range `[start, end]` as a new frame keeping absolute indices
    pub fn slice(&self, start: usize, end: usize) -> Result<Self> {
        let (Some(a), Some(b)) = (self.row_of(start), self.row_of(end)) else {
            return Err(Error::CycleInvalid(format!(
                "frames {start}..{end} not in data range"
            )));
        };
        if a > b {
            return Err(Error::CycleInvalid(format!(
                "start frame {start} is after end frame {end}"
            )));
        }

        let mut out = Self::with_offset(self.dim, self.sampling_rate, start, b - a + 1);
        out.flipped = self.flipped;
        out.time = self.time[a..=b].to_vec();
        for (key, values) in self.iter() {
            out.insert(key.clone(), values[a..=b].to_vec())?;
        }
        Ok(out)
    }

    /// Drop the first `n` rows and renumber frames from zero
    pub fn drop_leading_rows(&mut self, n: usize) {
        let n = n.min(self.len());
        let rows = self.len() - n;
        let mut out = Self::new(self.dim, self.sampling_rate, rows);
        out.flipped = self.flipped;
        for (key, values) in self.keys.iter().zip(self.values.iter()) {
            out.lookup.insert(key.clone(), out.keys.len());
            out.keys.push(key.clone());
            out.values.push(values[n..].to_vec());
        }
        *self = out;
    }
}
