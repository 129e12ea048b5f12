pub mod compositor;
pub mod convert;
pub mod device;
pub mod driver;
pub mod math;
pub mod pipeline;

use compositor::NullCompositorBridge;
use device::NullRenderDevice;
use driver::FrameDriver;
use pipeline::{PipelineConfig, StereoPipeline};

/// Runs a short headless frame loop against the null seams and returns the
/// number of completed frames. Smoke-test entry used by the probe binary.
pub fn run_headless(frames: u32) -> u32 {
    let mut pipeline = StereoPipeline::new(
        NullCompositorBridge::new(),
        NullRenderDevice::new(),
        PipelineConfig::default(),
    );
    if let Err(err) = pipeline.initialize() {
        log::error!("[pipeline] headless initialize failed: {err}");
        return 0;
    }

    let mirror = pipeline.mirror_size().unwrap_or([0, 0]);
    let mut driver =
        FrameDriver::new(pipeline).with_mirror(0.0, 0.0, mirror[0] as f32, mirror[1] as f32);
    driver.run(frames, &mut |_, _| {})
}
