//! # PVT trajectory files
//!
//! The controller's PVT engine consumes trajectory files of one line per
//! segment: a duration followed by a (displacement, exit-velocity) pair per
//! positioner of the group. This module renders those files and builds the
//! two shapes the client knows how to generate: constant-velocity line scans
//! and trajectories sampled through arrays of positions.
//!
//! The builders only difference and clamp the caller's positions; path
//! interpolation between segments is performed by the controller itself.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Fraction of a stage's maximum velocity a line scan may use.
const LINE_SCAN_VELOCITY_FRACTION: f64 = 0.75;

/// Fraction of a stage's maximum acceleration a line scan may use.
const LINE_SCAN_ACCEL_FRACTION: f64 = 0.5;

/// Smallest permitted ramp duration, in seconds.
const MIN_RAMP_TIME_S: f64 = 2.0e-5;

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// Possible trajectory construction errors.
#[derive(Debug, Error)]
pub enum TrajError {
    #[error("Scan step cannot be zero")]
    ZeroStep,

    #[error("Either a pixel time or a scan time must be given")]
    NoTiming,

    #[error("Unknown positioner given: {0}")]
    UnknownPositioner(String),

    #[error("Position arrays must all have the same length (expected {expected}, `{positioner}` has {found})")]
    LengthMismatch {
        positioner: String,
        expected: usize,
        found: usize,
    },

    #[error("Position arrays must contain at least two points")]
    TooFewPoints,

    #[error("Max velocity {limit} violated for {positioner} (requires {required})")]
    VelocityLimit {
        positioner: String,
        limit: f64,
        required: f64,
    },

    #[error("Max acceleration {limit} violated for {positioner} (requires {required})")]
    AccelerationLimit {
        positioner: String,
        limit: f64,
        required: f64,
    },
}

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Velocity and acceleration limits of one positioner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

/// One segment of a PVT file: a duration and a (displacement, exit velocity)
/// pair per positioner of the trajectory group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvtSegment {
    pub duration_s: f64,
    pub axes: Vec<(f64, f64)>,
}

/// A complete PVT trajectory file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvtFile(pub Vec<PvtSegment>);

/// Parameters of a single-axis constant-velocity line scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineScanParams {
    /// First trigger position
    pub start: f64,

    /// Last trigger position
    pub stop: f64,

    /// Distance between triggers
    pub step: f64,

    /// Time per trigger. If not given it is derived from `scan_time_s`.
    pub pixel_time_s: Option<f64>,

    /// Total scan duration, used when `pixel_time_s` is not given
    pub scan_time_s: Option<f64>,

    /// Acceleration cap, clamped to the stage limit
    pub accel: Option<f64>,
}

/// A built line scan: matching forward and backward trajectory files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineScan {
    pub forward: PvtFile,
    pub backward: PvtFile,

    /// Scan start extended backwards by the ramp offset
    pub start: f64,

    /// Scan stop extended forwards by the ramp offset
    pub stop: f64,

    pub pixel_time_s: f64,

    /// Number of trigger pulses the scan produces
    pub npulses: usize,

    pub nsegments: usize,
}

/// A trajectory built from per-positioner position arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayTraj {
    pub file: PvtFile,

    /// Per-positioner start position. `None` for positioners that ride along
    /// at zero displacement.
    pub start: BTreeMap<String, Option<f64>>,

    pub pixel_time_s: f64,

    pub npulses: usize,

    pub nsegments: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl PvtFile {
    /// Render the file in the text form the controller consumes.
    pub fn render(&self) -> String {
        let mut out = String::from("\n");

        for segment in &self.0 {
            let mut line = format!("{:.8}", segment.duration_s);
            for (dp, v) in &segment.axes {
                line.push_str(&format!(", {:.8}, {:.8}", dp, v));
            }
            out.push_str(&line);
            out.push('\n');
        }

        out
    }

    pub fn num_segments(&self) -> usize {
        self.0.len()
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build forward and backward line-scan trajectories for one axis of a group.
///
/// `axes` is the full positioner list of the trajectory group, in group
/// order; positioners other than `scan_axis` ride along with zero
/// displacement. The scan velocity is derived from the distance and timing,
/// clamped to a derated fraction of the stage limits.
pub fn build_line_scan(
    axes: &[String],
    scan_axis: &str,
    params: &LineScanParams,
    limits: &AxisLimits,
) -> Result<LineScan, TrajError> {
    if params.step == 0.0 {
        return Err(TrajError::ZeroStep);
    }

    if !axes.iter().any(|a| a == scan_axis) {
        return Err(TrajError::UnknownPositioner(scan_axis.to_string()));
    }

    let max_velocity = LINE_SCAN_VELOCITY_FRACTION * limits.max_velocity;
    let max_accel = LINE_SCAN_ACCEL_FRACTION * limits.max_acceleration;

    let accel = params.accel.unwrap_or(max_accel).min(max_accel);

    let scan_dir = if params.start > params.stop { -1.0 } else { 1.0 };
    let step = scan_dir * params.step.abs();

    let span = (params.stop - params.start).abs();
    let npulses = ((span + step.abs() * 1.1) / step.abs()) as usize;

    let pixel_time_s = match (params.pixel_time_s, params.scan_time_s) {
        (Some(pt), _) => pt,
        (None, Some(st)) => st.abs() / (npulses as f64 - 1.0),
        (None, None) => return Err(TrajError::NoTiming),
    };
    let scan_time_s = pixel_time_s * npulses as f64;

    let distance = span + step.abs();
    let velocity = (distance / scan_time_s).min(max_velocity);

    let ramp_time_s = (velocity / accel).abs().max(MIN_RAMP_TIME_S);
    let ramp_dist = velocity * ramp_time_s;
    let offset = step / 2.0 + scan_dir * ramp_dist;

    // Segments carry (ramp, velocity) for the scanned axis only, the rest of
    // the group holds position
    let build = |sign: f64| -> PvtFile {
        let axis_pair = |ramp: f64, velo: f64| -> Vec<(f64, f64)> {
            axes.iter()
                .map(|a| {
                    if a == scan_axis {
                        (sign * ramp, sign * velo)
                    } else {
                        (0.0, 0.0)
                    }
                })
                .collect()
        };

        PvtFile(vec![
            PvtSegment {
                duration_s: ramp_time_s,
                axes: axis_pair(ramp_dist, velocity),
            },
            PvtSegment {
                duration_s: scan_time_s,
                axes: axis_pair(distance, velocity),
            },
            PvtSegment {
                duration_s: ramp_time_s,
                axes: axis_pair(ramp_dist, 0.0),
            },
        ])
    };

    Ok(LineScan {
        forward: build(1.0),
        backward: build(-1.0),
        start: params.start - offset,
        stop: params.stop + offset,
        pixel_time_s,
        npulses: npulses + 1,
        nsegments: 3,
    })
}

/// Build a trajectory through per-positioner position arrays.
///
/// The supplied positions are treated as midpoints between trigger events;
/// ramp-in and ramp-out segments are prepended and appended so the group
/// reaches each midpoint at constant velocity and ends at rest. Per-segment
/// velocities and accelerations are derived by finite differences and
/// validated against the stage limits (optionally tightened by
/// `max_accels`). Positioners absent from `positions` ride along at zero
/// displacement.
pub fn build_array_traj(
    axes: &[String],
    positions: &BTreeMap<String, Vec<f64>>,
    segment_time_s: f64,
    limits: &BTreeMap<String, AxisLimits>,
    max_accels: &BTreeMap<String, f64>,
) -> Result<ArrayTraj, TrajError> {
    let dt = segment_time_s.abs();

    // Validate the input arrays before any maths
    let mut npts = None;
    for (name, values) in positions {
        if !axes.iter().any(|a| a == name) {
            return Err(TrajError::UnknownPositioner(name.clone()));
        }
        match npts {
            None => npts = Some(values.len()),
            Some(n) if n != values.len() => {
                return Err(TrajError::LengthMismatch {
                    positioner: name.clone(),
                    expected: n,
                    found: values.len(),
                })
            }
            _ => (),
        }
    }
    let npts = match npts {
        Some(n) if n >= 2 => n,
        _ => return Err(TrajError::TooFewPoints),
    };

    let npulses = npts + 1;
    let nrows = npulses + 1;

    let mut start = BTreeMap::new();
    let mut deltas: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut velocities: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

    for name in axes {
        let axis_limits = limits.get(name).copied().unwrap_or(AxisLimits {
            max_velocity: f64::INFINITY,
            max_acceleration: f64::INFINITY,
        });
        let max_v = axis_limits.max_velocity;
        let max_a = match max_accels.get(name) {
            Some(a) => a.min(axis_limits.max_acceleration),
            None => axis_limits.max_acceleration,
        };

        let upos = match positions.get(name) {
            Some(p) => p,
            None => {
                // Ride-along axis
                start.insert(name.clone(), None);
                deltas.insert(name.as_str(), vec![0.0; nrows]);
                velocities.insert(name.as_str(), vec![0.0; nrows]);
                continue;
            }
        };

        // Trigger points sit at the midpoints of the requested positions,
        // extrapolated one point past each end for the ramps
        let n = upos.len();
        let mut mid = Vec::with_capacity(n + 4);
        mid.push(3.0 * upos[0] - 2.0 * upos[1]);
        mid.push(2.0 * upos[0] - upos[1]);
        mid.extend_from_slice(upos);
        mid.push(2.0 * upos[n - 1] - upos[n - 2]);
        mid.push(3.0 * upos[n - 1] - 2.0 * upos[n - 2]);

        let pos: Vec<f64> = mid.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();

        // Back the start position up so the first segment accelerates to the
        // entry velocity of the second
        let (p0, p1, p2) = (pos[0], pos[1], pos[2]);
        let v0 = (p1 - p0) / dt;
        let v1 = (p2 - p1) / dt;
        let a0 = (v1 - v0) / dt;
        let axis_start = p1 - (p1 - p0) * dt * v0.max(0.5 * max_v) / a0.max(0.5 * max_a);

        let rel: Vec<f64> = pos.iter().map(|p| p - axis_start).collect();
        let dpos: Vec<f64> = rel.windows(2).map(|w| w[1] - w[0]).collect();

        let mut velo: Vec<f64> = gradient(&dpos).iter().map(|g| g / dt).collect();
        if let Some(last) = velo.last_mut() {
            *last = 0.0;
        }
        let accel: Vec<f64> = gradient(&velo).iter().map(|g| g / dt).collect();

        let peak_v = velo.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        if peak_v > max_v {
            return Err(TrajError::VelocityLimit {
                positioner: name.clone(),
                limit: max_v,
                required: peak_v,
            });
        }
        let peak_a = accel.iter().fold(0.0f64, |m, a| m.max(a.abs()));
        if peak_a > max_a {
            return Err(TrajError::AccelerationLimit {
                positioner: name.clone(),
                limit: max_a,
                required: peak_a,
            });
        }

        start.insert(name.clone(), Some(axis_start));
        deltas.insert(name.as_str(), dpos);
        velocities.insert(name.as_str(), velo);
    }

    let segments = (0..nrows)
        .map(|n| PvtSegment {
            duration_s: dt,
            axes: axes
                .iter()
                .map(|name| (deltas[name.as_str()][n], velocities[name.as_str()][n]))
                .collect(),
        })
        .collect();

    Ok(ArrayTraj {
        file: PvtFile(segments),
        start,
        pixel_time_s: dt,
        npulses,
        nsegments: npulses + 1,
    })
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Finite-difference gradient with one-sided differences at the ends.
fn gradient(xs: &[f64]) -> Vec<f64> {
    let n = xs.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    xs[1] - xs[0]
                } else if i == n - 1 {
                    xs[n - 1] - xs[n - 2]
                } else {
                    (xs[i + 1] - xs[i - 1]) / 2.0
                }
            })
            .collect(),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn axes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_gradient() {
        assert_eq!(gradient(&[0.0, 1.0, 2.0, 3.0]), vec![1.0, 1.0, 1.0, 1.0]);
        assert_eq!(gradient(&[0.0, 1.0, 4.0]), vec![1.0, 2.0, 3.0]);
        assert_eq!(gradient(&[5.0]), vec![0.0]);
    }

    #[test]
    fn test_render_layout() {
        let file = PvtFile(vec![PvtSegment {
            duration_s: 0.5,
            axes: vec![(1.0, 2.0), (0.0, 0.0)],
        }]);

        assert_eq!(
            file.render(),
            "\n0.50000000, 1.00000000, 2.00000000, 0.00000000, 0.00000000\n"
        );
    }

    #[test]
    fn test_line_scan() {
        let group = axes(&["X", "Y"]);
        let params = LineScanParams {
            start: 0.0,
            stop: 1.0,
            step: 0.001,
            pixel_time_s: Some(0.01),
            scan_time_s: None,
            accel: None,
        };
        let limits = AxisLimits {
            max_velocity: 10.0,
            max_acceleration: 40.0,
        };

        let scan = build_line_scan(&group, "X", &params, &limits).unwrap();

        assert_eq!(scan.nsegments, 3);
        assert_eq!(scan.forward.num_segments(), 3);
        assert_eq!(scan.npulses, 1002);

        // Scan segment holds the full distance at the scan velocity
        let scan_seg = &scan.forward.0[1];
        assert!((scan_seg.axes[0].0 - 1.001).abs() < 1e-9);
        assert!(scan_seg.axes[0].1 > 0.0);

        // Ride-along axis never moves
        for seg in &scan.forward.0 {
            assert_eq!(seg.axes[1], (0.0, 0.0));
        }

        // Backward mirror
        let back_seg = &scan.backward.0[1];
        assert!((back_seg.axes[0].0 + 1.001).abs() < 1e-9);

        // Ramp offset extends the end points
        assert!(scan.start < 0.0);
        assert!(scan.stop > 1.0);

        // Exit velocity of the final segment is zero
        assert_eq!(scan.forward.0[2].axes[0].1, 0.0);
    }

    #[test]
    fn test_line_scan_timing_from_scan_time() {
        let group = axes(&["X"]);
        let params = LineScanParams {
            start: 0.0,
            stop: 1.0,
            step: 0.01,
            pixel_time_s: None,
            scan_time_s: Some(10.0),
            accel: None,
        };
        let limits = AxisLimits {
            max_velocity: 10.0,
            max_acceleration: 40.0,
        };

        let scan = build_line_scan(&group, "X", &params, &limits).unwrap();
        assert!(scan.pixel_time_s > 0.0);

        // Without either timing the build is rejected
        let no_timing = LineScanParams {
            pixel_time_s: None,
            scan_time_s: None,
            ..params
        };
        assert!(matches!(
            build_line_scan(&group, "X", &no_timing, &limits),
            Err(TrajError::NoTiming)
        ));
    }

    #[test]
    fn test_line_scan_rejects_bad_input() {
        let group = axes(&["X"]);
        let limits = AxisLimits {
            max_velocity: 10.0,
            max_acceleration: 40.0,
        };
        let params = LineScanParams {
            start: 0.0,
            stop: 1.0,
            step: 0.0,
            pixel_time_s: Some(0.01),
            scan_time_s: None,
            accel: None,
        };

        assert!(matches!(
            build_line_scan(&group, "X", &params, &limits),
            Err(TrajError::ZeroStep)
        ));

        let params = LineScanParams {
            step: 0.01,
            ..params
        };
        assert!(matches!(
            build_line_scan(&group, "Z", &params, &limits),
            Err(TrajError::UnknownPositioner(_))
        ));
    }

    #[test]
    fn test_array_traj() {
        let group = axes(&["X", "Y"]);
        let mut positions = BTreeMap::new();
        positions.insert("X".to_string(), vec![0.0, 1.0, 2.0, 3.0]);

        let mut limits = BTreeMap::new();
        limits.insert(
            "X".to_string(),
            AxisLimits {
                max_velocity: 100.0,
                max_acceleration: 400.0,
            },
        );
        limits.insert(
            "Y".to_string(),
            AxisLimits {
                max_velocity: 100.0,
                max_acceleration: 400.0,
            },
        );

        let traj =
            build_array_traj(&group, &positions, 1.0, &limits, &BTreeMap::new()).unwrap();

        // Four points give five pulses and six segments
        assert_eq!(traj.npulses, 5);
        assert_eq!(traj.nsegments, 6);
        assert_eq!(traj.file.num_segments(), 6);

        // The moving axis has a start position, the ride-along does not
        assert!(traj.start["X"].is_some());
        assert!(traj.start["Y"].is_none());

        // Ride-along rows are all zero
        for seg in &traj.file.0 {
            assert_eq!(seg.axes[1], (0.0, 0.0));
        }

        // The trajectory ends at rest
        assert_eq!(traj.file.0.last().unwrap().axes[0].1, 0.0);
    }

    #[test]
    fn test_array_traj_rejects_bad_input() {
        let group = axes(&["X", "Y"]);
        let limits = BTreeMap::new();

        let mut positions = BTreeMap::new();
        positions.insert("Z".to_string(), vec![0.0, 1.0]);
        assert!(matches!(
            build_array_traj(&group, &positions, 1.0, &limits, &BTreeMap::new()),
            Err(TrajError::UnknownPositioner(_))
        ));

        let mut positions = BTreeMap::new();
        positions.insert("X".to_string(), vec![0.0, 1.0]);
        positions.insert("Y".to_string(), vec![0.0, 1.0, 2.0]);
        assert!(matches!(
            build_array_traj(&group, &positions, 1.0, &limits, &BTreeMap::new()),
            Err(TrajError::LengthMismatch { .. })
        ));

        let mut positions = BTreeMap::new();
        positions.insert("X".to_string(), vec![0.0]);
        assert!(matches!(
            build_array_traj(&group, &positions, 1.0, &limits, &BTreeMap::new()),
            Err(TrajError::TooFewPoints)
        ));
    }

    #[test]
    fn test_array_traj_limit_violations() {
        let group = axes(&["X"]);
        let mut positions = BTreeMap::new();
        positions.insert("X".to_string(), vec![0.0, 10.0, 40.0, 90.0]);

        let mut limits = BTreeMap::new();
        limits.insert(
            "X".to_string(),
            AxisLimits {
                max_velocity: 1.0,
                max_acceleration: 1000.0,
            },
        );

        assert!(matches!(
            build_array_traj(&group, &positions, 1.0, &limits, &BTreeMap::new()),
            Err(TrajError::VelocityLimit { .. })
        ));

        // A per-call acceleration cap tightens the stage limit
        limits.insert(
            "X".to_string(),
            AxisLimits {
                max_velocity: 1000.0,
                max_acceleration: 1000.0,
            },
        );
        let mut caps = BTreeMap::new();
        caps.insert("X".to_string(), 1.0e-3);
        assert!(matches!(
            build_array_traj(&group, &positions, 1.0, &limits, &caps),
            Err(TrajError::AccelerationLimit { .. })
        ));
    }
}
