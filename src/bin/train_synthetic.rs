//! tilesplat-synthetic: end-to-end training against a synthetic scene.
//!
//! Builds a random ground-truth Gaussian cloud, photographs it from a ring
//! of cameras, then trains a color-degraded copy of the same cloud against
//! those renders. Useful as a smoke run on real hardware without any
//! dataset on disk.
//!
//! Usage:
//!   tilesplat-synthetic [--points N] [--views K] [--iters N] [--size WxH]
//!                       [--seed U64] [--log-interval N]

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tilesplat::core::{Gaussian, SceneInit, SH_C0};
use tilesplat::gpu::GpuContext;
use tilesplat::{Camera, Trainer, TrainerConfig, TrainView};

fn parse_size(s: &str) -> (u32, u32) {
    let (w, h) = s.split_once('x').expect("--size expects WxH, e.g. 256x256");
    (w.parse().unwrap(), h.parse().unwrap())
}

/// A camera on a ring of the given radius, looking at the origin.
fn ring_camera(angle: f32, radius: f32, width: u32, height: u32) -> Camera {
    let eye = Vector3::new(radius * angle.sin(), 0.3, -radius * angle.cos());
    let forward = (-eye).normalize();
    let right = Vector3::new(0.0, 1.0, 0.0).cross(&forward).normalize();
    let up = forward.cross(&right);

    // World-to-camera: rows are the camera axes.
    let mut rotation = Matrix3::zeros();
    rotation.row_mut(0).copy_from(&right.transpose());
    rotation.row_mut(1).copy_from(&up.transpose());
    rotation.row_mut(2).copy_from(&forward.transpose());
    let translation = -rotation * eye;

    let focal = 0.9 * width as f32;
    Camera::from_intrinsics(focal, focal, width, height, rotation, translation, 0.05, 100.0)
}

fn random_cloud(rng: &mut StdRng, points: usize) -> Vec<Gaussian> {
    (0..points)
        .map(|_| {
            let mut sh_coeffs = [[0.0f32; 3]; 16];
            let color = Vector3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
            sh_coeffs[0] = [
                (color.x - 0.5) / SH_C0,
                (color.y - 0.5) / SH_C0,
                (color.z - 0.5) / SH_C0,
            ];
            Gaussian {
                position: Vector3::new(
                    rng.gen_range(-0.8..0.8),
                    rng.gen_range(-0.8..0.8),
                    rng.gen_range(-0.8..0.8),
                ),
                rotation: UnitQuaternion::identity(),
                log_scale: Vector3::new(-3.2, -3.2, -3.2),
                opacity_logit: 2.0,
                sh_coeffs,
            }
        })
        .collect()
}

/// Mean absolute error between two rgba8 images, alpha ignored.
fn image_l1(a: &[u8], b: &[u8]) -> f32 {
    let mut acc = 0u64;
    let mut n = 0u64;
    for (pa, pb) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        for ch in 0..3 {
            acc += (pa[ch] as i32 - pb[ch] as i32).unsigned_abs() as u64;
            n += 1;
        }
    }
    acc as f32 / (n as f32 * 255.0)
}

fn main() {
    println!("tilesplat-synthetic v{}", tilesplat::VERSION);

    let mut points: usize = 2000;
    let mut views: usize = 8;
    let mut iters: u32 = 500;
    let mut size = (256u32, 256u32);
    let mut seed: u64 = 7;
    let mut log_interval: u32 = 50;

    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--points" => points = args.next().unwrap().parse().unwrap(),
            "--views" => views = args.next().unwrap().parse().unwrap(),
            "--iters" => iters = args.next().unwrap().parse().unwrap(),
            "--size" => size = parse_size(&args.next().unwrap()),
            "--seed" => seed = args.next().unwrap().parse().unwrap(),
            "--log-interval" => log_interval = args.next().unwrap().parse().unwrap(),
            "--help" | "-h" => {
                eprintln!("Usage:");
                eprintln!("  tilesplat-synthetic [--points N] [--views K] [--iters N] [--size WxH] [--seed U64] [--log-interval N]");
                return;
            }
            other => {
                eprintln!("Unknown arg: {other}");
                return;
            }
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let truth = random_cloud(&mut rng, points);
    let cameras: Vec<Camera> = (0..views)
        .map(|i| {
            let angle = i as f32 / views as f32 * std::f32::consts::TAU;
            ring_camera(angle, 3.0, size.0, size.1)
        })
        .collect();

    let config = TrainerConfig {
        max_iterations: iters,
        sh_degree: 0,
        seed,
        densify: tilesplat::config::DensifySchedule {
            warmup: iters / 4,
            interval: 100,
            stop: iters.saturating_sub(iters / 4),
        },
        ..Default::default()
    };

    // Photograph the ground truth.
    let ctx = GpuContext::new_blocking().expect("GPU init failed");
    let truth_init = SceneInit::from_gaussians(&truth, 0).expect("truth scene");
    let placeholder = vec![0u8; (size.0 * size.1 * 4) as usize];
    let placeholder_view =
        TrainView::from_rgba(&ctx, cameras[0].clone(), &placeholder).expect("placeholder view");
    let mut truth_trainer =
        Trainer::new(ctx, truth_init, vec![placeholder_view], config.clone())
            .expect("truth trainer");
    let targets: Vec<Vec<u8>> = cameras
        .iter()
        .map(|cam| truth_trainer.render_view(cam).expect("truth render").rgba)
        .collect();
    eprintln!("rendered {} synthetic target views", targets.len());

    // Degrade the colors and train them back.
    let mut degraded = truth.clone();
    for g in &mut degraded {
        g.sh_coeffs[0] = [0.0, 0.0, 0.0];
    }
    let degraded_init = SceneInit::from_gaussians(&degraded, 0).expect("train scene");

    let ctx = GpuContext::new_blocking().expect("GPU init failed");
    let train_views: Vec<TrainView> = cameras
        .iter()
        .zip(&targets)
        .map(|(cam, rgba)| TrainView::from_rgba(&ctx, cam.clone(), rgba).expect("view"))
        .collect();
    let mut trainer =
        Trainer::new(ctx, degraded_init, train_views, config).expect("trainer");

    let initial = trainer.render_view(&cameras[0]).expect("initial render");
    let initial_err = image_l1(&initial.rgba, &targets[0]);

    while trainer.status().iteration < iters {
        trainer.step().expect("training step");
        let s = trainer.status();
        if s.iteration % log_interval == 0 {
            eprintln!(
                "iter {:5}  {:6.1} it/s  points={}  next_densify={:?}",
                s.iteration, s.iters_per_sec, s.num_points, s.next_densify
            );
        }
    }

    let final_render = trainer.render_view(&cameras[0]).expect("final render");
    let final_err = image_l1(&final_render.rgba, &targets[0]);
    eprintln!(
        "view 0 L1: {:.4} -> {:.4}  ({} -> {} points)",
        initial_err,
        final_err,
        points,
        trainer.num_points()
    );
}
