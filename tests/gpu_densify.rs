//! GPU tests for the densify/prune compactor: one Gaussian each of prune,
//! clone, split, and keep, driven through decide → scan → cap → scan →
//! scatter with hand-planted influence counts.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use tilesplat::config::TrainerConfig;
use tilesplat::core::pack::PackedGaussian;
use tilesplat::core::{sigmoid, Gaussian, SceneInit};
use tilesplat::gpu::buffers::{create_buffer_init, read_buffer_blocking};
use tilesplat::gpu::densify::DensifyPass;
use tilesplat::gpu::scan::PrefixScanner;
use tilesplat::gpu::scene::GpuScene;
use tilesplat::gpu::GpuContext;

fn gpu_or_skip() -> Option<GpuContext> {
    match GpuContext::new_blocking() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn gaussian(opacity_logit: f32, log_scale: f32, x: f32) -> Gaussian {
    Gaussian {
        position: Vector3::new(x, 0.0, 2.0),
        rotation: UnitQuaternion::identity(),
        log_scale: Vector3::new(log_scale, log_scale, log_scale),
        opacity_logit,
        sh_coeffs: [[0.125; 3]; 16],
    }
}

#[test]
fn test_compaction_prune_clone_split_keep() {
    let Some(ctx) = gpu_or_skip() else { return };
    let device = &ctx.device;

    // Index 0: transparent → prune. Index 1: high-error, tiny → clone.
    // Index 2: high-error, large → split. Index 3: quiet → keep.
    let gaussians = [
        gaussian(-6.0, -3.0, 0.0),
        gaussian(1.0, -6.0, 0.5),
        gaussian(1.0, 0.0, 1.0),
        gaussian(2.0, -3.0, 1.5),
    ];
    let init = SceneInit::from_gaussians(&gaussians, 0).unwrap();
    let src = GpuScene::upload(device, &init).unwrap();

    let config = TrainerConfig {
        sh_degree: 0,
        prune_opacity: 0.005,
        clone_threshold_count: 50,
        split_scale_threshold: 0.01,
        max_new_points_per_step: 100,
        ..Default::default()
    };

    let metric_counts = create_buffer_init(
        device,
        "metric counts",
        &[0u32, 100, 100, 0],
        wgpu::BufferUsages::STORAGE,
    );

    let scanner = PrefixScanner::new(device, 16).unwrap();
    let densify = DensifyPass::new(device, 16);

    let mut encoder = device.create_command_encoder(&Default::default());
    densify
        .record_decide(device, &mut encoder, &scanner, &src, &metric_counts, &config)
        .unwrap();
    ctx.queue.submit(Some(encoder.finish()));

    let total = densify.read_total(device, &ctx.queue).unwrap();
    assert_eq!(total, 5, "0 + 2 + 2 + 1 outputs");

    let dst = GpuScene::allocate(device, total, 0);
    let mut encoder = device.create_command_encoder(&Default::default());
    densify.record_scatter(device, &mut encoder, &src, &dst, &config);
    ctx.queue.submit(Some(encoder.finish()));

    let out: Vec<PackedGaussian> =
        read_buffer_blocking(device, &ctx.queue, &dst.gaussians, total as usize).unwrap();
    let src_packed: Vec<PackedGaussian> =
        read_buffer_blocking(device, &ctx.queue, &src.gaussians, 4).unwrap();

    // Clone of index 1: slot 0 is the verbatim parent, slot 1 is jittered
    // but keeps the parent's scale.
    assert_eq!(out[0], src_packed[1], "clone slot 0 copies packed bits");
    let clone_child = out[1].unpack();
    assert!(
        (clone_child.log_scale.x - (-6.0)).abs() < 1e-2,
        "clone keeps parent scale"
    );

    // Split of index 2: both children shrink by ln(1.6) and respect the
    // opacity ceiling.
    let parent = gaussians[2].log_scale.x;
    for child in [out[2].unpack(), out[3].unpack()] {
        let expected = parent - 1.6f32.ln();
        assert!(
            (child.log_scale.x - expected).abs() < 1e-2,
            "split child scale {} vs expected {}",
            child.log_scale.x,
            expected
        );
        assert!(
            sigmoid(child.opacity_logit) <= 0.8 + 1e-3,
            "split opacity must stay at or under 0.8"
        );
    }

    // Split children straddle the parent: offsets are equal and opposite.
    let (c0, c1) = (out[2].unpack(), out[3].unpack());
    let mid = (c0.position + c1.position) / 2.0;
    assert!(
        (mid - gaussians[2].position).norm() < 1e-2,
        "children are symmetric about the parent"
    );

    // Keep of index 3 is byte-identical.
    assert_eq!(out[4], src_packed[3], "keep copies packed bits verbatim");

    // Optimizer state followed: position params match the packed children.
    let opt_pos: Vec<tilesplat::gpu::scene::OptVec4> =
        read_buffer_blocking(device, &ctx.queue, &dst.opt_pos, total as usize).unwrap();
    for (i, packed) in out.iter().enumerate() {
        let mean = packed.unpack().position;
        for axis in 0..3 {
            assert!(
                (opt_pos[i].param[axis] - mean[axis]).abs() < 1e-2,
                "optimizer position tracks the packed store at slot {i}"
            );
        }
    }

    // New slots restart their moments.
    for slot in [1usize, 2, 3] {
        assert_eq!(opt_pos[slot].m, [0.0; 4]);
        assert_eq!(opt_pos[slot].v, [0.0; 4]);
    }
}
