//! Boundary to the host rendering framework. The pipeline never talks to
//! a GPU API directly; everything goes through [`RenderDevice`].

#[cfg(feature = "render-wgpu")]
pub mod wgpu_backend;

use crate::compositor::{AdapterLuid, MirrorHandle};
use crate::math::Mat4;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u64);

/// On-screen framebuffer region, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("gpu device unavailable: {0}")]
    Unavailable(String),
    #[error("render target allocation failed: {0}")]
    TargetAllocation(String),
    #[error("depth buffer allocation failed: {0}")]
    DepthAllocation(String),
    #[error("shader compilation failed: {0}")]
    Shader(String),
}

/// Single-threaded, like the rest of the frame cycle.
pub trait RenderDevice: Send {
    fn label(&self) -> &'static str;

    fn adapter_luid(&self) -> AdapterLuid;

    fn create_target(&mut self, size: [u32; 2]) -> Result<TargetId, DeviceError>;
    fn create_depth(&mut self, size: [u32; 2]) -> Result<DepthId, DeviceError>;
    fn destroy_target(&mut self, target: TargetId);
    fn destroy_depth(&mut self, depth: DepthId);

    fn bind_and_clear(&mut self, target: TargetId, depth: DepthId);
    fn unbind(&mut self);

    fn push_view(&mut self, view: Mat4, projection: Mat4);
    fn pop_view(&mut self);

    fn create_present_shader(&mut self) -> Result<ShaderId, DeviceError>;
    fn destroy_shader(&mut self, shader: ShaderId);

    fn blit_mirror(&mut self, mirror: MirrorHandle, shader: ShaderId, rect: ScreenRect);
}

/// Headless device: hands out ids, tracks binding and view-stack state,
/// and flags misuse through logs.
#[derive(Default)]
pub struct NullRenderDevice {
    next_id: u64,
    live_targets: Vec<TargetId>,
    live_depths: Vec<DepthId>,
    live_shaders: Vec<ShaderId>,
    bound: Option<(TargetId, DepthId)>,
    view_stack: Vec<(Mat4, Mat4)>,
    blits: u64,
}

impl NullRenderDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn live_target_count(&self) -> usize {
        self.live_targets.len()
    }

    pub fn live_depth_count(&self) -> usize {
        self.live_depths.len()
    }

    pub fn live_shader_count(&self) -> usize {
        self.live_shaders.len()
    }

    pub fn bound_target(&self) -> Option<(TargetId, DepthId)> {
        self.bound
    }

    pub fn view_stack_depth(&self) -> usize {
        self.view_stack.len()
    }

    pub fn current_view(&self) -> Option<&(Mat4, Mat4)> {
        self.view_stack.last()
    }

    pub fn blits(&self) -> u64 {
        self.blits
    }
}

impl RenderDevice for NullRenderDevice {
    fn label(&self) -> &'static str {
        "Null Render Device"
    }

    fn adapter_luid(&self) -> AdapterLuid {
        AdapterLuid::ANY
    }

    fn create_target(&mut self, size: [u32; 2]) -> Result<TargetId, DeviceError> {
        let target = TargetId(self.next_id());
        log::debug!(
            "[device] created {}x{} render target {target:?}",
            size[0],
            size[1]
        );
        self.live_targets.push(target);
        Ok(target)
    }

    fn create_depth(&mut self, size: [u32; 2]) -> Result<DepthId, DeviceError> {
        let depth = DepthId(self.next_id());
        log::debug!(
            "[device] created {}x{} depth buffer {depth:?}",
            size[0],
            size[1]
        );
        self.live_depths.push(depth);
        Ok(depth)
    }

    fn destroy_target(&mut self, target: TargetId) {
        self.live_targets.retain(|t| *t != target);
    }

    fn destroy_depth(&mut self, depth: DepthId) {
        self.live_depths.retain(|d| *d != depth);
    }

    fn bind_and_clear(&mut self, target: TargetId, depth: DepthId) {
        if let Some((bound, _)) = self.bound {
            log::warn!("[device] binding {target:?} while {bound:?} is still bound");
        }
        self.bound = Some((target, depth));
    }

    fn unbind(&mut self) {
        if self.bound.take().is_none() {
            log::warn!("[device] unbind without a bound render target");
        }
    }

    fn push_view(&mut self, view: Mat4, projection: Mat4) {
        self.view_stack.push((view, projection));
    }

    fn pop_view(&mut self) {
        if self.view_stack.pop().is_none() {
            log::warn!("[device] view stack popped while empty");
        }
    }

    fn create_present_shader(&mut self) -> Result<ShaderId, DeviceError> {
        let shader = ShaderId(self.next_id());
        self.live_shaders.push(shader);
        Ok(shader)
    }

    fn destroy_shader(&mut self, shader: ShaderId) {
        self.live_shaders.retain(|s| *s != shader);
    }

    fn blit_mirror(&mut self, mirror: MirrorHandle, _shader: ShaderId, rect: ScreenRect) {
        log::trace!(
            "[device] mirror {} blit to {:.0},{:.0} {:.0}x{:.0}",
            mirror.id,
            rect.x,
            rect.y,
            rect.width,
            rect.height
        );
        self.blits += 1;
    }
}
