//! Boundary to the opaque tracking-and-compositor backend. Types here are
//! the backend's wire convention: row-major matrices, C-layout vectors and
//! quaternions, tangent-based fields of view.

#[cfg(feature = "vr-openxr")]
pub mod openxr;

use crate::device::TargetId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Render/submit order within one frame. The compositor's distortion
    /// step depends on this order; it is not cosmetic.
    pub const fn ordered() -> [Eye; 2] {
        [Eye::Left, Eye::Right]
    }

    pub const fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawVector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawQuaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for RawQuaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawPose {
    pub position: RawVector3,
    pub orientation: RawQuaternion,
}

/// Row-major 4x4 matrix in the backend's convention: `rows[row][column]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMatrix {
    pub rows: [[f32; 4]; 4],
}

impl RawMatrix {
    pub const IDENTITY: RawMatrix = RawMatrix {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };
}

/// Half-angle tangents of an asymmetric per-eye frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FovPort {
    pub up_tan: f32,
    pub down_tan: f32,
    pub left_tan: f32,
    pub right_tan: f32,
}

impl Default for FovPort {
    fn default() -> Self {
        // Symmetric 90 degree frustum.
        Self {
            up_tan: 1.0,
            down_tan: 1.0,
            left_tan: 1.0,
            right_tan: 1.0,
        }
    }
}

/// Off-axis projection in the backend convention (right-handed, depth
/// mapped to [0, 1] the way the vendor runtime derives it).
pub fn projection_from_fov(fov: FovPort, near: f32, far: f32) -> RawMatrix {
    let sx = 2.0 / (fov.left_tan + fov.right_tan);
    let sy = 2.0 / (fov.up_tan + fov.down_tan);
    let ox = (fov.right_tan - fov.left_tan) / (fov.right_tan + fov.left_tan);
    let oy = (fov.up_tan - fov.down_tan) / (fov.up_tan + fov.down_tan);
    let depth = far / (near - far);
    RawMatrix {
        rows: [
            [sx, 0.0, ox, 0.0],
            [0.0, sy, oy, 0.0],
            [0.0, 0.0, depth, near * depth],
            [0.0, 0.0, -1.0, 0.0],
        ],
    }
}

/// Identity of the GPU adapter the backend composites on. An all-zero
/// LUID means the backend imposes no adapter constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterLuid(pub [u8; 8]);

impl AdapterLuid {
    pub const ANY: AdapterLuid = AdapterLuid([0; 8]);

    pub fn is_constrained(self) -> bool {
        self != AdapterLuid::ANY
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmdInfo {
    pub product_name: &'static str,
    pub resolution: [u32; 2],
    pub refresh_rate: f32,
    pub default_fov: [FovPort; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub visible: bool,
    pub should_quit: bool,
    pub should_recenter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingOrigin {
    /// Poses report height above the physical floor.
    FloorLevel,
    /// Poses are relative to the headset's resting eye position.
    EyeLevel,
}

/// Per-eye poses plus the sample time the backend wants echoed back at
/// submission.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawFramePoses {
    pub poses: [RawPose; 2],
    pub sample_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackingState {
    pub head: RawPose,
    pub orientation_tracked: bool,
    pub position_tracked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorHandle {
    pub id: u64,
    pub size: [u32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLayer {
    pub target: TargetId,
    pub viewport: [u32; 2],
    pub fov: FovPort,
    pub pose: RawPose,
}

/// A complete stereo frame handed to the compositor. Assembled only after
/// both eyes have committed; no partial-eye frame is ever submitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSubmission {
    pub frame_index: u64,
    pub sample_time: f64,
    pub eyes: [EyeLayer; 2],
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("compositor backend unavailable: {0}")]
    Unavailable(String),
    #[error("mirror surface creation failed: {0}")]
    Mirror(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The compositor lost the display. Callers should treat this as fatal.
    #[error("display lost")]
    DisplayLost,
    #[error("transient submission failure: {0}")]
    Transient(String),
}

/// The tracking-and-compositor backend seam.
///
/// Implementations own session state; the pipeline guarantees call order
/// (create before anything else, commit both eyes before submit, destroy
/// last) and exclusive single-threaded access.
pub trait CompositorBridge: Send {
    fn label(&self) -> &'static str;

    fn create_session(&mut self) -> Result<HmdInfo, SessionError>;
    fn destroy_session(&mut self);

    fn required_adapter(&self) -> AdapterLuid;

    fn recommended_target_size(&self, eye: Eye, fov: FovPort) -> [u32; 2];

    fn set_tracking_origin(&mut self, origin: TrackingOrigin);

    fn predict_poses(&mut self, frame_index: u64) -> RawFramePoses;

    fn tracking_state(&mut self, sample_time: f64) -> TrackingState;

    fn status(&mut self) -> SessionStatus;
    fn recenter(&mut self);

    fn create_mirror(&mut self, size: [u32; 2]) -> Result<MirrorHandle, SessionError>;
    fn destroy_mirror(&mut self, mirror: MirrorHandle);

    fn commit(&mut self, eye: Eye, target: TargetId);

    fn submit(&mut self, frame: &FrameSubmission) -> Result<(), SubmitError>;

    fn last_error(&self) -> Option<String> {
        None
    }

    fn projection(&self, fov: FovPort, near: f32, far: f32) -> RawMatrix {
        projection_from_fov(fov, near, far)
    }
}

/// In-process stand-in for a headset runtime; validates the submission
/// contract so the frame cycle can run headless.
pub struct NullCompositorBridge {
    resolution: [u32; 2],
    fov: FovPort,
    session_active: bool,
    next_mirror_id: u64,
    last_submitted_index: Option<u64>,
    submissions: u64,
    last_error: Option<String>,
}

const NULL_IPD_METERS: f32 = 0.064;
const NULL_REFRESH_HZ: f64 = 90.0;

impl NullCompositorBridge {
    pub fn new() -> Self {
        Self::with_resolution([2160, 1200])
    }

    pub fn with_resolution(resolution: [u32; 2]) -> Self {
        Self {
            resolution,
            fov: FovPort {
                up_tan: 1.33,
                down_tan: 1.33,
                left_tan: 1.06,
                right_tan: 1.09,
            },
            session_active: false,
            next_mirror_id: 1,
            last_submitted_index: None,
            submissions: 0,
            last_error: None,
        }
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn last_submitted_index(&self) -> Option<u64> {
        self.last_submitted_index
    }
}

impl Default for NullCompositorBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositorBridge for NullCompositorBridge {
    fn label(&self) -> &'static str {
        "Null Compositor Bridge"
    }

    fn create_session(&mut self) -> Result<HmdInfo, SessionError> {
        self.session_active = true;
        Ok(HmdInfo {
            product_name: "Null HMD",
            resolution: self.resolution,
            refresh_rate: NULL_REFRESH_HZ as f32,
            default_fov: [self.fov, self.fov],
        })
    }

    fn destroy_session(&mut self) {
        self.session_active = false;
    }

    fn required_adapter(&self) -> AdapterLuid {
        AdapterLuid::ANY
    }

    fn recommended_target_size(&self, _eye: Eye, _fov: FovPort) -> [u32; 2] {
        [self.resolution[0] / 2, self.resolution[1]]
    }

    fn set_tracking_origin(&mut self, origin: TrackingOrigin) {
        log::debug!("[compositor] tracking origin set to {origin:?}");
    }

    fn predict_poses(&mut self, frame_index: u64) -> RawFramePoses {
        let half_ipd = NULL_IPD_METERS / 2.0;
        let eye = |offset: f32| RawPose {
            position: RawVector3 {
                x: offset,
                y: 1.6,
                z: 0.0,
            },
            orientation: RawQuaternion::default(),
        };
        RawFramePoses {
            poses: [eye(-half_ipd), eye(half_ipd)],
            sample_time: frame_index as f64 / NULL_REFRESH_HZ,
        }
    }

    fn tracking_state(&mut self, _sample_time: f64) -> TrackingState {
        TrackingState {
            head: RawPose {
                position: RawVector3 {
                    x: 0.0,
                    y: 1.6,
                    z: 0.0,
                },
                orientation: RawQuaternion::default(),
            },
            orientation_tracked: true,
            position_tracked: true,
        }
    }

    fn status(&mut self) -> SessionStatus {
        SessionStatus {
            visible: self.session_active,
            ..SessionStatus::default()
        }
    }

    fn recenter(&mut self) {
        log::debug!("[compositor] recentered tracking origin");
    }

    fn create_mirror(&mut self, size: [u32; 2]) -> Result<MirrorHandle, SessionError> {
        let id = self.next_mirror_id;
        self.next_mirror_id += 1;
        Ok(MirrorHandle { id, size })
    }

    fn destroy_mirror(&mut self, _mirror: MirrorHandle) {}

    fn commit(&mut self, _eye: Eye, _target: TargetId) {}

    fn submit(&mut self, frame: &FrameSubmission) -> Result<(), SubmitError> {
        if !self.session_active {
            let message = "submission without an active session".to_string();
            self.last_error = Some(message.clone());
            return Err(SubmitError::Transient(message));
        }
        if frame.eyes[0].target == frame.eyes[1].target {
            let message = "both eyes submitted the same render target".to_string();
            self.last_error = Some(message.clone());
            return Err(SubmitError::Transient(message));
        }
        if let Some(last) = self.last_submitted_index {
            if frame.frame_index <= last {
                let message = format!(
                    "frame index {} is not beyond the last submitted index {last}",
                    frame.frame_index
                );
                self.last_error = Some(message.clone());
                return Err(SubmitError::Transient(message));
            }
        }
        self.last_submitted_index = Some(frame.frame_index);
        self.submissions += 1;
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(target: u64, pose: RawPose) -> EyeLayer {
        EyeLayer {
            target: TargetId(target),
            viewport: [1080, 1200],
            fov: FovPort::default(),
            pose,
        }
    }

    #[test]
    fn null_bridge_accepts_well_formed_submissions() {
        let mut bridge = NullCompositorBridge::new();
        bridge.create_session().expect("null session");
        let poses = bridge.predict_poses(0);
        let frame = FrameSubmission {
            frame_index: 0,
            sample_time: poses.sample_time,
            eyes: [layer(1, poses.poses[0]), layer(2, poses.poses[1])],
        };
        assert!(bridge.submit(&frame).is_ok());
        assert_eq!(bridge.submissions(), 1);
        assert_eq!(bridge.last_submitted_index(), Some(0));
    }

    #[test]
    fn null_bridge_rejects_shared_eye_targets() {
        let mut bridge = NullCompositorBridge::new();
        bridge.create_session().expect("null session");
        let frame = FrameSubmission {
            frame_index: 0,
            sample_time: 0.0,
            eyes: [layer(7, RawPose::default()), layer(7, RawPose::default())],
        };
        let err = bridge.submit(&frame).unwrap_err();
        assert!(err.to_string().contains("same render target"));
        assert!(bridge.last_error().is_some());
    }

    #[test]
    fn null_bridge_rejects_reused_frame_index() {
        let mut bridge = NullCompositorBridge::new();
        bridge.create_session().expect("null session");
        let frame = FrameSubmission {
            frame_index: 3,
            sample_time: 0.0,
            eyes: [layer(1, RawPose::default()), layer(2, RawPose::default())],
        };
        assert!(bridge.submit(&frame).is_ok());
        assert!(bridge.submit(&frame).is_err());
    }

    #[test]
    fn projection_centers_the_frustum_midpoint() {
        let fov = FovPort::default();
        let m = projection_from_fov(fov, 0.2, 1000.0).rows;
        // Symmetric tangents leave no off-axis shift.
        assert_eq!(m[0][2], 0.0);
        assert_eq!(m[1][2], 0.0);
        // A point on the near plane center projects to depth 0.
        let z = -0.2f32;
        let clip_z = m[2][2] * z + m[2][3];
        let clip_w = m[3][2] * z;
        assert!((clip_z / clip_w).abs() < 1e-5);
    }

    #[test]
    fn asymmetric_fov_shifts_the_projection_center() {
        let fov = FovPort {
            up_tan: 1.33,
            down_tan: 1.33,
            left_tan: 1.06,
            right_tan: 1.09,
        };
        let m = projection_from_fov(fov, 0.2, 1000.0).rows;
        assert!(m[0][2] > 0.0);
        assert_eq!(m[1][2], 0.0);
    }
}
