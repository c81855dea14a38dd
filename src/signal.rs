//! Signal normalization.
//!
//! Raw exports pair timestamps and values that may be NaN-padded to a common
//! length. Epochs arrive either as per-frame 0/1 masks or as explicit
//! `[start, end]` ranges; both are encoded here as alternating start (+1) and
//! end (-1) transitions.

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Direction of an epoch transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edge {
    /// Epoch begins (+1)
    Start,
    /// Epoch ends (-1)
    End,
}

impl Edge {
    /// +1 for a start, -1 for an end.
    pub fn label(self) -> i8 {
        match self {
            Edge::Start => 1,
            Edge::End => -1,
        }
    }
}

/// A timestamped epoch transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub time: f64,
    pub edge: Edge,
}

impl Transition {
    fn new(time: f64, edge: Edge) -> Self {
        Transition { time, edge }
    }
}

fn check_shape(timestamps: &[f64], values: &[f64]) -> Result<()> {
    if timestamps.len() != values.len() {
        return Err(ConvertError::ShapeMismatch {
            timestamps: timestamps.len(),
            values: values.len(),
        });
    }
    Ok(())
}

/// Drops every index whose value is NaN from both sequences.
///
/// Order is preserved and the outputs always have equal length. NaN
/// timestamps paired with real values are kept.
///
/// # Examples
///
/// ```
/// use session_converter::signal::align_and_mask;
///
/// let (t, v) = align_and_mask(&[0.0, 1.0, 2.0], &[5.0, f64::NAN, 7.0]).unwrap();
/// assert_eq!(t, vec![0.0, 2.0]);
/// assert_eq!(v, vec![5.0, 7.0]);
/// ```
pub fn align_and_mask(timestamps: &[f64], values: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    check_shape(timestamps, values)?;

    Ok(timestamps
        .iter()
        .zip(values)
        .filter(|(_, v)| !v.is_nan())
        .map(|(t, v)| (*t, *v))
        .unzip())
}

/// Converts a 0/1 frame mask into epoch transitions.
///
/// Every index `i` where `values[i + 1] - values[i]` is ±1 becomes a
/// transition at `timestamps[i + 1]`: the first frame of an epoch marks its
/// start, and the first frame after it marks its end. When the first
/// transition is an end, the recording began mid-epoch and a start is
/// inserted at `timestamps[0]`.
///
/// Differences other than ±1 (including those involving NaN) are ignored.
pub fn edges_from_mask(timestamps: &[f64], values: &[f64]) -> Result<Vec<Transition>> {
    check_shape(timestamps, values)?;

    let mut transitions: Vec<Transition> = values
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| {
            let diff = pair[1] - pair[0];
            if diff == 1.0 {
                Some(Transition::new(timestamps[i + 1], Edge::Start))
            } else if diff == -1.0 {
                Some(Transition::new(timestamps[i + 1], Edge::End))
            } else {
                None
            }
        })
        .collect();

    if matches!(transitions.first(), Some(t) if t.edge == Edge::End) {
        transitions.insert(0, Transition::new(timestamps[0], Edge::Start));
    }

    Ok(transitions)
}

/// Converts explicit `[start, end]` ranges into transitions, skipping
/// missing ranges.
pub fn edges_from_ranges(ranges: &[Option<(f64, f64)>]) -> Vec<Transition> {
    ranges
        .iter()
        .flatten()
        .flat_map(|&(start, end)| {
            [
                Transition::new(start, Edge::Start),
                Transition::new(end, Edge::End),
            ]
        })
        .collect()
}

/// Splits transitions into parallel timestamp and label sequences.
pub fn split_transitions(transitions: &[Transition]) -> (Vec<f64>, Vec<i8>) {
    transitions.iter().map(|t| (t.time, t.edge.label())).unzip()
}

/// Sorted, de-duplicated copy of `values` (NaN entries removed).
pub fn unique_sorted(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup();
    out
}
