//! Perception boundary: observed clips and the camera model that places
//! segmented objects in the map frame.
//!
//! An [`EventObservation`] is what the perception pipeline hands over for one
//! video clip. The graph consumes it through
//! [`EventGroundedGraph::add_event_from_observation`](crate::graph::egg::EventGroundedGraph::add_event_from_observation).

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GraphError;
use crate::graph::{ObservationOdom, Point3, Pose};
use crate::ordered::OrderedMap;
use crate::temporal::Timestamp;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("observation for \"{location}\" has no frames")]
    #[diagnostic(
        code(egg::ingest::empty_clip),
        help("Every observed clip needs at least one frame with a timestamp and odometry.")
    )]
    EmptyClip { location: String },

    #[error("object \"{object}\" references frame {frame}, which is not part of the clip")]
    #[diagnostic(
        code(egg::ingest::unknown_frame),
        help("The first and last mask frames of each object must appear in the clip's frame list.")
    )]
    UnknownFrame { object: String, frame: u32 },

    #[error("mask for object \"{object}\" in frame {frame} is empty")]
    #[diagnostic(
        code(egg::ingest::empty_mask),
        help("Masks are pixel polygons; provide at least one vertex.")
    )]
    EmptyMask { object: String, frame: u32 },

    #[error("invalid camera intrinsics: {message}")]
    #[diagnostic(
        code(egg::ingest::invalid_intrinsics),
        help("Focal lengths and depth must be positive, finite numbers. Check the [camera] section.")
    )]
    InvalidIntrinsics { message: String },

    #[error("failed to read observations from {path}")]
    #[diagnostic(
        code(egg::ingest::read),
        help("Check that the observation file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse observations in {path}: {message}")]
    #[diagnostic(
        code(egg::ingest::parse),
        help("The file must contain a JSON array of event observations.")
    )]
    Parse { path: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

// ---------------------------------------------------------------------------
// Observation records
// ---------------------------------------------------------------------------

/// One frame of a clip: when it was captured and where the robot was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: u32,
    /// Nanoseconds since the UNIX epoch.
    pub timestamp: Timestamp,
    pub odom: ObservationOdom,
}

/// A pixel polygon outlining an object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskObservation {
    pub frame: u32,
    pub polygon: Vec<[f64; 2]>,
}

/// An object of interest in a clip, seen first in `first` and last in `last`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedObject {
    pub name: String,
    pub object_class: String,
    /// What the object does in the event; becomes the edge's role.
    #[serde(alias = "description")]
    pub role: String,
    pub first: MaskObservation,
    pub last: MaskObservation,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub visual_embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub instance_views: Vec<String>,
}

/// Everything perception reports about one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventObservation {
    pub location: String,
    pub event_description: String,
    pub frames: Vec<FrameRecord>,
    #[serde(default)]
    pub objects_of_interest: Vec<ObservedObject>,
}

/// Time span and pose history of a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub start: Timestamp,
    pub end: Timestamp,
    pub odom: OrderedMap<Timestamp, ObservationOdom>,
}

impl EventObservation {
    /// Span and pose history, in frame order.
    pub fn trajectory(&self) -> IngestResult<Trajectory> {
        let (Some(start), Some(end)) = (
            self.frames.iter().map(|f| f.timestamp).min(),
            self.frames.iter().map(|f| f.timestamp).max(),
        ) else {
            return Err(IngestError::EmptyClip {
                location: self.location.clone(),
            });
        };
        let odom = self.frames.iter().map(|f| (f.timestamp, f.odom)).collect();
        Ok(Trajectory { start, end, odom })
    }

    fn frame(&self, object: &ObservedObject, frame: u32) -> IngestResult<&FrameRecord> {
        self.frames
            .iter()
            .find(|f| f.frame == frame)
            .ok_or_else(|| IngestError::UnknownFrame {
                object: object.name.clone(),
                frame,
            })
    }

    /// Map-frame positions of `object` at its first and last sighting.
    pub fn localize_object(
        &self,
        object: &ObservedObject,
        camera: &dyn CameraModel,
    ) -> IngestResult<OrderedMap<Timestamp, Point3>> {
        let mut positions = OrderedMap::with_capacity(2);
        for mask in [&object.first, &object.last] {
            if mask.polygon.is_empty() {
                return Err(IngestError::EmptyMask {
                    object: object.name.clone(),
                    frame: mask.frame,
                });
            }
            let frame = self.frame(object, mask.frame)?;
            let position = camera.localize(mask, &frame.odom.camera)?;
            positions.insert(frame.timestamp, position);
        }
        Ok(positions)
    }
}

/// Read a JSON array of observations.
pub fn load_observations(path: &Path) -> IngestResult<Vec<EventObservation>> {
    let json = std::fs::read_to_string(path).map_err(|source| IngestError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|e| IngestError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Camera model
// ---------------------------------------------------------------------------

/// Places a segmented object in the map frame.
pub trait CameraModel: Send + Sync {
    fn localize(&self, mask: &MaskObservation, camera_pose: &Pose) -> IngestResult<Point3>;
}

/// Pinhole camera that assumes every object sits at a fixed depth.
///
/// The mask centroid is back-projected through the intrinsics at `depth_m`
/// along the optical axis, then moved into the map frame by the camera pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedDepthCamera {
    #[serde(default = "default_fx")]
    pub fx: f64,
    #[serde(default = "default_fy")]
    pub fy: f64,
    #[serde(default = "default_cx")]
    pub cx: f64,
    #[serde(default = "default_cy")]
    pub cy: f64,
    #[serde(default = "default_depth")]
    pub depth_m: f64,
}

fn default_fx() -> f64 {
    525.0
}

fn default_fy() -> f64 {
    525.0
}

fn default_cx() -> f64 {
    319.5
}

fn default_cy() -> f64 {
    239.5
}

fn default_depth() -> f64 {
    1.5
}

impl Default for FixedDepthCamera {
    fn default() -> Self {
        Self {
            fx: default_fx(),
            fy: default_fy(),
            cx: default_cx(),
            cy: default_cy(),
            depth_m: default_depth(),
        }
    }
}

impl FixedDepthCamera {
    pub fn validate(&self) -> IngestResult<()> {
        for (name, value) in [("fx", self.fx), ("fy", self.fy), ("depth_m", self.depth_m)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(IngestError::InvalidIntrinsics {
                    message: format!("{name} = {value}"),
                });
            }
        }
        for (name, value) in [("cx", self.cx), ("cy", self.cy)] {
            if !value.is_finite() {
                return Err(IngestError::InvalidIntrinsics {
                    message: format!("{name} = {value}"),
                });
            }
        }
        Ok(())
    }
}

impl CameraModel for FixedDepthCamera {
    fn localize(&self, mask: &MaskObservation, camera_pose: &Pose) -> IngestResult<Point3> {
        self.validate()?;
        let n = mask.polygon.len() as f64;
        let (u, v) = mask
            .polygon
            .iter()
            .fold((0.0, 0.0), |(su, sv), [pu, pv]| (su + pu, sv + pv));
        let (u, v) = (u / n, v / n);

        let local = [
            (u - self.cx) / self.fx * self.depth_m,
            (v - self.cy) / self.fy * self.depth_m,
            self.depth_m,
        ];
        let rotated = rotate(camera_pose.orientation, local);
        let p = camera_pose.position;
        Ok([rotated[0] + p[0], rotated[1] + p[1], rotated[2] + p[2]])
    }
}

/// Rotate `v` by the unit quaternion `[qx, qy, qz, qw]`.
fn rotate(q: [f64; 4], v: Point3) -> Point3 {
    let [qx, qy, qz, qw] = q;
    let u = [qx, qy, qz];
    let t = cross(u, v).map(|c| 2.0 * c);
    let ut = cross(u, t);
    [
        v[0] + qw * t[0] + ut[0],
        v[1] + qw * t[1] + ut[1],
        v[2] + qw * t[2] + ut[2],
    ]
}

fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
