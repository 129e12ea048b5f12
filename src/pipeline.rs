//! The dual-eye render/submit state machine.
//!
//! `StereoPipeline` owns the compositor session and the per-eye GPU
//! resources, and drives the fixed per-frame cycle:
//! `update_poses` → `begin_eye(Left)` … `end_eye(Left)` →
//! `begin_eye(Right)` … `end_eye(Right)` (submit) → `present_mirror`.
//!
//! Call-order violations are programmer errors: they panic through
//! `debug_assert!` in debug builds and degrade to logged no-ops in release
//! builds.

use crate::compositor::{
    CompositorBridge, Eye, EyeLayer, FovPort, FrameSubmission, HmdInfo, MirrorHandle,
    RawFramePoses, SessionError, SubmitError, TrackingOrigin,
};
use crate::convert;
use crate::device::{DepthId, DeviceError, RenderDevice, ScreenRect, ShaderId, TargetId};
use crate::math::{Mat4, Pose, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub near_clip: f32,
    pub far_clip: f32,
    /// Mirror surface is the HMD resolution divided by this factor.
    pub mirror_divisor: u32,
    pub tracking_origin: TrackingOrigin,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            near_clip: 0.2,
            far_clip: 1000.0,
            mirror_divisor: 2,
            tracking_origin: TrackingOrigin::FloorLevel,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(reader: impl std::io::Read) -> Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    /// The backend could not create a session. Not retried automatically.
    #[error("compositor backend unavailable: {0}")]
    BackendUnavailable(SessionError),
    /// The rendering adapter differs from the one the compositor requires.
    /// A hard constraint, not retryable.
    #[error("rendering adapter does not match the compositor's required adapter")]
    AdapterMismatch,
    #[error("resource allocation failed: {0}")]
    ResourceAllocationFailed(String),
}

/// Allocated at `initialize`, never resized, never shared across eyes.
#[derive(Debug, Clone, Copy)]
pub struct EyeSlot {
    target: TargetId,
    depth: DepthId,
    size: [u32; 2],
}

impl EyeSlot {
    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn depth(&self) -> DepthId {
        self.depth
    }

    pub fn size(&self) -> [u32; 2] {
        self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePoses {
    pub frame_index: u64,
    pub sample_time: f64,
    pub eyes: [Pose; 2],
}

impl FramePoses {
    pub fn eye(&self, eye: Eye) -> Pose {
        self.eyes[eye.index()]
    }
}

struct PredictedPoses {
    frame_index: u64,
    raw: RawFramePoses,
}

struct SessionResources {
    hmd: HmdInfo,
    slots: [EyeSlot; 2],
    mirror: MirrorHandle,
    present_shader: ShaderId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Active(Eye),
    /// `begin_eye` observed quit status; the paired `end_eye` is a silent
    /// no-op and the frame produces no commits or submission.
    Skipped(Eye),
}

pub struct StereoPipeline<B: CompositorBridge, D: RenderDevice> {
    bridge: B,
    device: D,
    config: PipelineConfig,
    session: Option<SessionResources>,
    phase: FramePhase,
    frame_index: u64,
    poses: Option<PredictedPoses>,
    committed: [bool; 2],
    frame_skipped: bool,
    display_lost: bool,
}

impl<B: CompositorBridge, D: RenderDevice> StereoPipeline<B, D> {
    pub fn new(bridge: B, device: D, config: PipelineConfig) -> Self {
        Self {
            bridge,
            device,
            config,
            session: None,
            phase: FramePhase::Idle,
            frame_index: 0,
            poses: None,
            committed: [false; 2],
            frame_skipped: false,
            display_lost: false,
        }
    }

    /// Any failure after partial allocation releases everything created
    /// so far before returning.
    pub fn initialize(&mut self) -> Result<(), InitError> {
        if self.session.is_some() {
            return Ok(());
        }

        log::info!(
            "[pipeline] initializing against {} on {}",
            self.bridge.label(),
            self.device.label()
        );

        let hmd = self
            .bridge
            .create_session()
            .map_err(InitError::BackendUnavailable)?;

        let required = self.bridge.required_adapter();
        if required.is_constrained() && required != self.device.adapter_luid() {
            self.bridge.destroy_session();
            return Err(InitError::AdapterMismatch);
        }

        let left = match self.allocate_slot(Eye::Left, hmd.default_fov[0]) {
            Ok(slot) => slot,
            Err(err) => {
                self.bridge.destroy_session();
                return Err(InitError::ResourceAllocationFailed(err.to_string()));
            }
        };

        let right = match self.allocate_slot(Eye::Right, hmd.default_fov[1]) {
            Ok(slot) => slot,
            Err(err) => {
                self.release_slot(left);
                self.bridge.destroy_session();
                return Err(InitError::ResourceAllocationFailed(err.to_string()));
            }
        };

        let divisor = self.config.mirror_divisor.max(1);
        let mirror_size = [hmd.resolution[0] / divisor, hmd.resolution[1] / divisor];
        let mirror = match self.bridge.create_mirror(mirror_size) {
            Ok(mirror) => mirror,
            Err(err) => {
                self.release_slot(left);
                self.release_slot(right);
                self.bridge.destroy_session();
                return Err(InitError::ResourceAllocationFailed(err.to_string()));
            }
        };

        let present_shader = match self.device.create_present_shader() {
            Ok(shader) => shader,
            Err(err) => {
                self.bridge.destroy_mirror(mirror);
                self.release_slot(left);
                self.release_slot(right);
                self.bridge.destroy_session();
                return Err(InitError::ResourceAllocationFailed(err.to_string()));
            }
        };

        self.bridge.set_tracking_origin(self.config.tracking_origin);

        log::info!(
            "[pipeline] ready: {}x{} per eye, mirror {}x{}",
            left.size[0],
            left.size[1],
            mirror_size[0],
            mirror_size[1]
        );

        self.session = Some(SessionResources {
            hmd,
            slots: [left, right],
            mirror,
            present_shader,
        });
        self.phase = FramePhase::Idle;
        self.committed = [false; 2];
        self.frame_skipped = false;
        Ok(())
    }

    fn allocate_slot(&mut self, eye: Eye, fov: FovPort) -> Result<EyeSlot, DeviceError> {
        let size = self.bridge.recommended_target_size(eye, fov);
        let target = self.device.create_target(size)?;
        let depth = match self.device.create_depth(size) {
            Ok(depth) => depth,
            Err(err) => {
                self.device.destroy_target(target);
                return Err(err);
            }
        };
        log::debug!("[pipeline] {} eye slot: {}x{}", eye.label(), size[0], size[1]);
        Ok(EyeSlot { target, depth, size })
    }

    fn release_slot(&mut self, slot: EyeSlot) {
        self.device.destroy_target(slot.target);
        self.device.destroy_depth(slot.depth);
    }

    /// Queries predicted poses for the current frame index. Must run once
    /// per frame, before `begin_eye` for either eye.
    pub fn update_poses(&mut self) -> Option<FramePoses> {
        self.session.as_ref()?;
        if self.phase != FramePhase::Idle {
            self.contract_violation("update_poses called mid-eye");
            return None;
        }

        let raw = self.bridge.predict_poses(self.frame_index);
        self.poses = Some(PredictedPoses {
            frame_index: self.frame_index,
            raw,
        });
        self.committed = [false; 2];
        self.frame_skipped = false;
        Some(FramePoses {
            frame_index: self.frame_index,
            sample_time: raw.sample_time,
            eyes: [
                convert::pose_to_host(raw.poses[0]),
                convert::pose_to_host(raw.poses[1]),
            ],
        })
    }

    /// Binds and clears the eye's render target and pushes the view and
    /// projection derived from the predicted pose. No-op (recorded as a
    /// skip) when the backend signals quit; the caller's loop should
    /// terminate on its next status check.
    pub fn begin_eye(&mut self, eye: Eye) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        match self.phase {
            FramePhase::Idle => {}
            FramePhase::Active(active) | FramePhase::Skipped(active) => {
                self.contract_violation(if active == eye {
                    "begin_eye called twice without end_eye"
                } else {
                    "begin_eye while the other eye is active"
                });
                return;
            }
        }

        match eye {
            Eye::Left if self.committed[Eye::Left.index()] => {
                self.contract_violation("left eye begun twice in one frame");
                return;
            }
            Eye::Right if !self.frame_skipped && !self.committed[Eye::Left.index()] => {
                self.contract_violation("right eye begun before the left eye committed");
                return;
            }
            _ => {}
        }

        let fresh = self
            .poses
            .as_ref()
            .is_some_and(|poses| poses.frame_index == self.frame_index);
        if !fresh {
            self.contract_violation("begin_eye without update_poses for this frame");
            return;
        }

        if self.frame_skipped {
            self.phase = FramePhase::Skipped(eye);
            return;
        }

        let status = self.bridge.status();
        if status.should_quit {
            // The application was asked to quit; do not bind or retry.
            log::info!("[pipeline] quit requested, skipping {} eye", eye.label());
            self.phase = FramePhase::Skipped(eye);
            self.frame_skipped = true;
            return;
        }
        if status.should_recenter {
            log::info!("[pipeline] recenter requested");
            self.bridge.recenter();
        }

        let slot = session.slots[eye.index()];
        let fov = session.hmd.default_fov[eye.index()];
        self.device.bind_and_clear(slot.target, slot.depth);

        let raw_projection = self
            .bridge
            .projection(fov, self.config.near_clip, self.config.far_clip);
        // Flip Y for the host's texture origin.
        let projection = Mat4::scaling(1.0, -1.0, 1.0) * convert::matrix_to_host(&raw_projection);

        let poses = self.poses.as_ref().map(|p| p.raw.poses[eye.index()]);
        let pose = convert::pose_to_host(poses.unwrap_or_default());
        let forward = pose.orientation.rotate(Vec3::FORWARD);
        let up = pose.orientation.rotate(Vec3::UP);
        let view = Mat4::look_at_rh(pose.position, pose.position + forward, up);

        self.device.push_view(view, projection);
        self.phase = FramePhase::Active(eye);
    }

    /// Unbinds the eye's target, commits it to the backend swap-chain, and
    /// pops the view state. On the right eye, assembles both committed
    /// eyes into a single submission, submits it, and advances the frame
    /// index. Submission failure is logged, never propagated; the frame is
    /// dropped and the loop continues.
    pub fn end_eye(&mut self, eye: Eye) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        match self.phase {
            FramePhase::Skipped(active) if active == eye => {
                self.phase = FramePhase::Idle;
                if eye == Eye::Right {
                    self.frame_skipped = false;
                }
                return;
            }
            FramePhase::Active(active) if active == eye => {}
            _ => {
                self.contract_violation("end_eye without a matching begin_eye");
                return;
            }
        }

        let slot = session.slots[eye.index()];
        self.device.unbind();
        self.bridge.commit(eye, slot.target);
        self.device.pop_view();
        self.committed[eye.index()] = true;
        self.phase = FramePhase::Idle;

        if eye == Eye::Right {
            self.submit_frame();
        }
    }

    fn submit_frame(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(poses) = self.poses.as_ref() else {
            return;
        };

        let layer = |eye: Eye| EyeLayer {
            target: session.slots[eye.index()].target,
            viewport: session.slots[eye.index()].size,
            fov: session.hmd.default_fov[eye.index()],
            pose: poses.raw.poses[eye.index()],
        };
        let frame = FrameSubmission {
            frame_index: self.frame_index,
            sample_time: poses.raw.sample_time,
            eyes: [layer(Eye::Left), layer(Eye::Right)],
        };

        match self.bridge.submit(&frame) {
            Ok(()) => {
                log::debug!("[pipeline] frame {} submitted", self.frame_index);
            }
            Err(SubmitError::DisplayLost) => {
                self.display_lost = true;
                log::error!(
                    "[pipeline] display lost while submitting frame {}",
                    self.frame_index
                );
            }
            Err(err) => {
                let detail = self.bridge.last_error().unwrap_or_default();
                log::warn!(
                    "[pipeline] frame {} dropped: {err} {detail}",
                    self.frame_index
                );
            }
        }

        // Dropped frames advance the index too; the compositor keys
        // predicted poses off it, and reusing an index would pair the next
        // frame's content with a stale prediction.
        self.frame_index += 1;
        self.committed = [false; 2];
    }

    /// Independent of the eye cycle; safe any time after `initialize`.
    pub fn present_mirror(&mut self, x: f32, y: f32, width: f32, height: f32) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let status = self.bridge.status();
        if status.should_quit {
            return;
        }
        if status.should_recenter {
            self.bridge.recenter();
        }

        self.device.blit_mirror(
            session.mirror,
            session.present_shader,
            ScreenRect {
                x,
                y,
                width,
                height,
            },
        );
    }

    /// Releases eye slots, then the mirror surface, then the session.
    /// Idempotent; also runs from `Drop`.
    pub fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        log::info!("[pipeline] shutting down after {} frames", self.frame_index);
        for slot in session.slots {
            self.release_slot(slot);
        }
        self.bridge.destroy_mirror(session.mirror);
        self.device.destroy_shader(session.present_shader);
        self.bridge.destroy_session();

        self.phase = FramePhase::Idle;
        self.poses = None;
        self.committed = [false; 2];
        self.frame_skipped = false;
        // frame_index is deliberately not reset: the invariant is
        // strictly-increasing and never reused, including across re-init.
    }

    pub fn head_pose(&mut self) -> Option<Pose> {
        self.session.as_ref()?;
        let sample_time = self.poses.as_ref().map_or(0.0, |p| p.raw.sample_time);
        let state = self.bridge.tracking_state(sample_time);
        Some(convert::pose_to_host(state.head))
    }

    // Identity when tracking is absent.
    pub fn head_orientation_matrix(&mut self) -> Mat4 {
        if self.session.is_none() {
            return Mat4::IDENTITY;
        }
        let sample_time = self.poses.as_ref().map_or(0.0, |p| p.raw.sample_time);
        let state = self.bridge.tracking_state(sample_time);
        if state.orientation_tracked || state.position_tracked {
            Mat4::from_quat(convert::quaternion_to_host(state.head.orientation))
        } else {
            Mat4::IDENTITY
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Set once the backend reports the display lost during submission.
    /// Callers should treat it as fatal.
    pub fn display_lost(&self) -> bool {
        self.display_lost
    }

    pub fn quit_requested(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        self.bridge.status().should_quit
    }

    pub fn hmd(&self) -> Option<&HmdInfo> {
        self.session.as_ref().map(|session| &session.hmd)
    }

    pub fn mirror_size(&self) -> Option<[u32; 2]> {
        self.session.as_ref().map(|session| session.mirror.size)
    }

    pub fn eye_slot(&self, eye: Eye) -> Option<&EyeSlot> {
        self.session
            .as_ref()
            .map(|session| &session.slots[eye.index()])
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn contract_violation(&self, message: &str) {
        debug_assert!(false, "stereo pipeline contract violation: {message}");
        log::error!("[pipeline] contract violation: {message}");
    }
}

impl<B: CompositorBridge, D: RenderDevice> Drop for StereoPipeline<B, D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
