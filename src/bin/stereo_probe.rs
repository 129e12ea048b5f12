use std::env;

use parallax::compositor::NullCompositorBridge;
use parallax::device::NullRenderDevice;
use parallax::driver::FrameDriver;
use parallax::pipeline::{PipelineConfig, StereoPipeline};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("[probe] error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let frames: u32 = env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(90);

    let mut pipeline = StereoPipeline::new(
        NullCompositorBridge::new(),
        NullRenderDevice::new(),
        PipelineConfig::default(),
    );
    pipeline.initialize()?;

    let hmd = pipeline.hmd().cloned();
    if let Some(hmd) = &hmd {
        println!(
            "[probe] session up: {} {}x{} @ {:.0} Hz",
            hmd.product_name, hmd.resolution[0], hmd.resolution[1], hmd.refresh_rate
        );
    }

    let mirror = hmd
        .map(|hmd| [hmd.resolution[0] as f32 / 2.0, hmd.resolution[1] as f32 / 2.0])
        .unwrap_or([1080.0, 600.0]);
    let mut driver = FrameDriver::new(pipeline).with_mirror(0.0, 0.0, mirror[0], mirror[1]);
    let completed = driver.run(frames, &mut |_eye, _device| {});
    let pipeline = driver.into_pipeline();

    println!(
        "[probe] completed {completed}/{frames} frames, next frame index {}",
        pipeline.frame_index()
    );
    Ok(())
}
