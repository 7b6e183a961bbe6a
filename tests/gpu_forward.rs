//! GPU tests for the forward pipeline: a single centered splat renders
//! where expected, and a scene entirely behind the camera renders nothing.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use tilesplat::core::{Gaussian, SceneInit, SH_C0};
use tilesplat::gpu::GpuContext;
use tilesplat::{Camera, Trainer, TrainerConfig, TrainView};

fn gpu_or_skip() -> Option<GpuContext> {
    match GpuContext::new_blocking() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn test_camera() -> Camera {
    Camera::from_intrinsics(
        100.0,
        100.0,
        64,
        64,
        Matrix3::identity(),
        Vector3::zeros(),
        0.1,
        100.0,
    )
}

fn red_gaussian(position: Vector3<f32>) -> Gaussian {
    let mut sh_coeffs = [[0.0f32; 3]; 16];
    sh_coeffs[0] = [
        (1.0 - 0.5) / SH_C0,
        (0.0 - 0.5) / SH_C0,
        (0.0 - 0.5) / SH_C0,
    ];
    Gaussian {
        position,
        rotation: UnitQuaternion::identity(),
        log_scale: Vector3::new(-1.0, -1.0, -1.0),
        opacity_logit: 2.0,
        sh_coeffs,
    }
}

fn config() -> TrainerConfig {
    TrainerConfig {
        sh_degree: 0,
        max_buffer_bytes: 64 * 1024 * 1024,
        ..Default::default()
    }
}

fn trainer_with_scene(ctx: GpuContext, init: SceneInit) -> Trainer {
    let camera = test_camera();
    let white = vec![255u8; (camera.width * camera.height * 4) as usize];
    let view = TrainView::from_rgba(&ctx, camera, &white).unwrap();
    Trainer::new(ctx, init, vec![view], config()).unwrap()
}

#[test]
fn test_single_gaussian_renders_centered() {
    let Some(ctx) = gpu_or_skip() else { return };

    let init = SceneInit::from_gaussians(&[red_gaussian(Vector3::new(0.0, 0.0, 2.0))], 0).unwrap();
    let mut trainer = trainer_with_scene(ctx, init);

    let rendered = trainer.render_view(&test_camera()).unwrap();
    assert_eq!(rendered.visible_gaussians, 1);

    // Center pixel is saturated red with high coverage.
    let center = ((32 * 64 + 32) * 4) as usize;
    let px = &rendered.rgba[center..center + 4];
    assert!(px[0] > 200, "red channel at center, got {}", px[0]);
    assert!(px[1] < 16, "green must stay near zero, got {}", px[1]);
    assert!(px[2] < 16, "blue must stay near zero, got {}", px[2]);
    assert!(px[3] > 200, "alpha tracks coverage, got {}", px[3]);

    // A corner far outside the splat stays background.
    let corner = &rendered.rgba[0..4];
    assert!(corner[0] < 60, "corner should be mostly background");
}

#[test]
fn test_gaussians_behind_camera_all_culled() {
    let Some(ctx) = gpu_or_skip() else { return };

    let gaussians: Vec<Gaussian> = (0..100)
        .map(|i| {
            let x = ((i % 10) as f32 - 5.0) * 0.3;
            let y = ((i / 10) as f32 - 5.0) * 0.3;
            red_gaussian(Vector3::new(x, y, -5.0))
        })
        .collect();
    let init = SceneInit::from_gaussians(&gaussians, 0).unwrap();
    let mut trainer = trainer_with_scene(ctx, init);

    let rendered = trainer.render_view(&test_camera()).unwrap();
    assert_eq!(rendered.visible_gaussians, 0, "every Gaussian is behind");

    // Pure background everywhere: black with zero coverage.
    for px in rendered.rgba.chunks_exact(4) {
        assert_eq!(px[0], 0);
        assert_eq!(px[1], 0);
        assert_eq!(px[2], 0);
        assert_eq!(px[3], 0);
    }
}
