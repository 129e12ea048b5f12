use std::io::Write as _;

use parallax::compositor::{Eye, NullCompositorBridge};
use parallax::device::NullRenderDevice;
use parallax::driver::{FrameDriver, FrameOutcome};
use parallax::math::Vec3;
use parallax::pipeline::{PipelineConfig, StereoPipeline};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn null_pipeline() -> StereoPipeline<NullCompositorBridge, NullRenderDevice> {
    init_logs();
    StereoPipeline::new(
        NullCompositorBridge::new(),
        NullRenderDevice::new(),
        PipelineConfig::default(),
    )
}

#[test]
fn driver_runs_frames_against_null_seams() {
    let mut pipeline = null_pipeline();
    pipeline.initialize().expect("null session should come up");
    let mirror = pipeline.mirror_size().expect("mirror allocated");
    assert_eq!(mirror, [1080, 600]);

    let mut seen = Vec::new();
    let mut driver =
        FrameDriver::new(pipeline).with_mirror(0.0, 0.0, mirror[0] as f32, mirror[1] as f32);
    for _ in 0..3 {
        let outcome = driver.run_frame(&mut |eye, _device| seen.push(eye));
        assert_eq!(outcome, FrameOutcome::Completed);
    }

    assert_eq!(
        seen,
        vec![Eye::Left, Eye::Right, Eye::Left, Eye::Right, Eye::Left, Eye::Right]
    );

    let pipeline = driver.into_pipeline();
    assert_eq!(pipeline.frame_index(), 3);
    assert_eq!(pipeline.bridge().submissions(), 3);
    assert_eq!(pipeline.bridge().last_submitted_index(), Some(2));
    assert_eq!(pipeline.device().blits(), 3);
}

#[test]
fn scene_callback_sees_per_eye_view_matrices() {
    let mut pipeline = null_pipeline();
    pipeline.initialize().expect("initialize");

    let poses = pipeline.update_poses().expect("fresh poses");
    let mut eye_positions = Vec::new();
    for eye in Eye::ordered() {
        pipeline.begin_eye(eye);
        let (view, projection) = *pipeline
            .device()
            .current_view()
            .expect("view pushed while an eye is active");
        // The view matrix maps the eye position to the origin.
        let eye_pos = poses.eye(eye).position;
        let mapped = view.transform_point(eye_pos);
        assert!(mapped.length() < 1e-4);
        assert!(projection.cols[2][3] != 0.0, "perspective w row present");
        eye_positions.push(eye_pos);
        pipeline.end_eye(eye);
    }

    // Two eyes, one IPD apart.
    let separation = (eye_positions[1] - eye_positions[0]).length();
    assert!((separation - 0.064).abs() < 1e-5, "separation {separation}");
}

#[test]
fn shutdown_releases_everything_and_keeps_the_frame_counter() {
    let mut pipeline = null_pipeline();
    pipeline.initialize().expect("initialize");
    let _ = pipeline.update_poses();
    pipeline.begin_eye(Eye::Left);
    pipeline.end_eye(Eye::Left);
    pipeline.begin_eye(Eye::Right);
    pipeline.end_eye(Eye::Right);
    assert_eq!(pipeline.frame_index(), 1);

    pipeline.shutdown();
    assert!(!pipeline.is_initialized());
    assert_eq!(pipeline.device().live_target_count(), 0);
    assert_eq!(pipeline.device().live_depth_count(), 0);
    assert_eq!(pipeline.device().live_shader_count(), 0);

    pipeline.initialize().expect("re-initialize");
    assert_eq!(pipeline.frame_index(), 1, "counter survives re-init");
}

#[test]
fn head_pose_tracks_between_the_eyes() {
    let mut pipeline = null_pipeline();
    pipeline.initialize().expect("initialize");
    let poses = pipeline.update_poses().expect("fresh poses");
    let head = pipeline.head_pose().expect("tracking state available");

    let mid = (poses.eye(Eye::Left).position + poses.eye(Eye::Right).position) * 0.5;
    assert!((head.position - mid).length() < 1e-4);
    assert!((head.position - Vec3::ZERO).length() < 10.0);
}

#[test]
fn config_loads_from_a_file() {
    init_logs();
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            "near_clip": 0.05,
            "far_clip": 250.0,
            "mirror_divisor": 1,
            "tracking_origin": "EyeLevel"
        }}"#
    )
    .expect("write config");

    let reader = std::fs::File::open(file.path()).expect("reopen config");
    let config = PipelineConfig::from_json(reader).expect("parse config");
    assert_eq!(config.near_clip, 0.05);
    assert_eq!(config.far_clip, 250.0);
    assert_eq!(config.mirror_divisor, 1);

    let mut pipeline = StereoPipeline::new(
        NullCompositorBridge::new(),
        NullRenderDevice::new(),
        config,
    );
    pipeline.initialize().expect("initialize");
    // Divisor 1 keeps the mirror at full panel size.
    assert_eq!(pipeline.mirror_size(), Some([2160, 1200]));
}

#[test]
fn headless_helper_completes_requested_frames() {
    init_logs();
    assert_eq!(parallax::run_headless(5), 5);
}
