//! Host-loop glue: one display-refresh worth of pipeline calls around a
//! caller-supplied scene callback.

use crate::compositor::{CompositorBridge, Eye};
use crate::device::RenderDevice;
use crate::pipeline::StereoPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Completed,
    /// The backend asked the application to quit; nothing was rendered.
    QuitRequested,
    NotInitialized,
}

#[derive(Debug, Clone, Copy)]
struct MirrorViewport {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

pub struct FrameDriver<B: CompositorBridge, D: RenderDevice> {
    pipeline: StereoPipeline<B, D>,
    mirror_viewport: Option<MirrorViewport>,
}

impl<B: CompositorBridge, D: RenderDevice> FrameDriver<B, D> {
    pub fn new(pipeline: StereoPipeline<B, D>) -> Self {
        Self {
            pipeline,
            mirror_viewport: None,
        }
    }

    pub fn with_mirror(mut self, x: f32, y: f32, width: f32, height: f32) -> Self {
        self.mirror_viewport = Some(MirrorViewport {
            x,
            y,
            width,
            height,
        });
        self
    }

    pub fn pipeline(&self) -> &StereoPipeline<B, D> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut StereoPipeline<B, D> {
        &mut self.pipeline
    }

    pub fn into_pipeline(self) -> StereoPipeline<B, D> {
        self.pipeline
    }

    /// One frame: pose update, both eyes with the scene callback between
    /// each begin/end pair, then the mirror blit.
    pub fn run_frame<F>(&mut self, scene: &mut F) -> FrameOutcome
    where
        F: FnMut(Eye, &mut D),
    {
        if !self.pipeline.is_initialized() {
            return FrameOutcome::NotInitialized;
        }
        if self.pipeline.quit_requested() {
            return FrameOutcome::QuitRequested;
        }

        if self.pipeline.update_poses().is_none() {
            return FrameOutcome::NotInitialized;
        }

        for eye in Eye::ordered() {
            self.pipeline.begin_eye(eye);
            scene(eye, self.pipeline.device_mut());
            self.pipeline.end_eye(eye);
        }

        if let Some(viewport) = self.mirror_viewport {
            self.pipeline
                .present_mirror(viewport.x, viewport.y, viewport.width, viewport.height);
        }

        FrameOutcome::Completed
    }

    /// Returns the number of completed frames.
    pub fn run<F>(&mut self, max_frames: u32, scene: &mut F) -> u32
    where
        F: FnMut(Eye, &mut D),
    {
        let mut completed = 0;
        for _ in 0..max_frames {
            match self.run_frame(scene) {
                FrameOutcome::Completed => completed += 1,
                FrameOutcome::QuitRequested => {
                    log::info!("[driver] quit requested after {completed} frames");
                    break;
                }
                FrameOutcome::NotInitialized => {
                    log::warn!("[driver] pipeline not initialized, stopping");
                    break;
                }
            }
        }
        completed
    }
}
