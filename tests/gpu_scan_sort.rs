//! GPU tests for the prefix scanner and the radix sorter. These exercise
//! real dispatches and skip cleanly on machines without an adapter.

use tilesplat::gpu::buffers::{create_buffer, create_buffer_init, read_buffer_blocking};
use tilesplat::gpu::scan::PrefixScanner;
use tilesplat::gpu::sort::{RadixSorter, SortInfo, SORT_BLOCK};
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

fn exclusive_scan_reference(input: &[u32]) -> (Vec<u32>, u32) {
    let mut out = Vec::with_capacity(input.len());
    let mut acc = 0u32;
    for &v in input {
        out.push(acc);
        acc += v;
    }
    (out, acc)
}

fn run_scan(ctx: &GpuContext, input: &[u32]) -> Vec<u32> {
    let device = &ctx.device;
    let scanner = PrefixScanner::new(device, input.len() as u32).unwrap();
    let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
    let in_buf = create_buffer_init(device, "scan in", input, usage);
    let out_buf = create_buffer(
        device,
        "scan out",
        input.len() as u64 * 4,
        usage | wgpu::BufferUsages::COPY_DST,
    );

    let mut encoder = device.create_command_encoder(&Default::default());
    scanner
        .record(device, &mut encoder, &in_buf, &out_buf, input.len() as u32)
        .unwrap();
    ctx.queue.submit(Some(encoder.finish()));

    read_buffer_blocking(device, &ctx.queue, &out_buf, input.len()).unwrap()
}

#[test]
fn test_scan_literal_sequence() {
    let Some(ctx) = gpu_or_skip() else { return };
    let input = [3u32, 0, 4, 1, 5, 9, 2, 6];
    let scan = run_scan(&ctx, &input);
    assert_eq!(scan, vec![0, 3, 3, 7, 8, 13, 22, 24]);
    assert_eq!(scan[7] + input[7], 30, "total is scan[n-1] + input[n-1]");
}

#[test]
fn test_scan_matches_reference_across_blocks() {
    let Some(ctx) = gpu_or_skip() else { return };
    // Spans several scan blocks and a ragged tail.
    let input: Vec<u32> = (0..5000u32).map(|i| (i.wrapping_mul(2654435761)) % 7).collect();
    let scan = run_scan(&ctx, &input);
    let (expected, _) = exclusive_scan_reference(&input);
    assert_eq!(scan, expected);
}

#[test]
fn test_radix_sort_sorts_and_is_stable() {
    let Some(ctx) = gpu_or_skip() else { return };
    let device = &ctx.device;

    let n: u32 = 3000;
    // Few distinct keys so stability is actually exercised.
    let keys: Vec<u32> = (0..n).map(|i| (i.wrapping_mul(2654435761)) % 37 + 1).collect();
    let values: Vec<u32> = (0..n).collect();

    let sorter = RadixSorter::new(device, n).unwrap();
    let padded = n.div_ceil(SORT_BLOCK) * SORT_BLOCK;
    let mut padded_keys = keys.clone();
    padded_keys.resize(padded as usize, 0);
    let mut padded_values = values.clone();
    padded_values.resize(padded as usize, 0);
    ctx.queue
        .write_buffer(sorter.input_keys(), 0, bytemuck::cast_slice(&padded_keys));
    ctx.queue
        .write_buffer(sorter.input_values(), 0, bytemuck::cast_slice(&padded_values));

    let info = SortInfo {
        num_keys: n,
        padded_size: padded,
        num_blocks: padded / SORT_BLOCK,
        capacity: sorter.max_entries(),
    };
    let info_buf = create_buffer_init(
        device,
        "sort info",
        &[info],
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    );
    let dispatch = create_buffer_init(
        device,
        "sort dispatch",
        &[info.num_blocks, 1u32, 1u32],
        wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE,
    );

    let mut encoder = device.create_command_encoder(&Default::default());
    sorter
        .record(device, &mut encoder, &info_buf, &dispatch)
        .unwrap();
    ctx.queue.submit(Some(encoder.finish()));

    let sorted_keys: Vec<u32> =
        read_buffer_blocking(device, &ctx.queue, sorter.sorted_keys(), padded as usize).unwrap();
    let sorted_values: Vec<u32> =
        read_buffer_blocking(device, &ctx.queue, sorter.sorted_values(), padded as usize).unwrap();

    // Ascending keys over the whole padded stream (padding zeros first).
    for w in sorted_keys.windows(2) {
        assert!(w[0] <= w[1], "keys must be ascending");
    }

    // Every (key, value) pair survived: value indexes its original key.
    let pad_count = (padded - n) as usize;
    for (k, v) in sorted_keys[pad_count..].iter().zip(&sorted_values[pad_count..]) {
        assert_eq!(*k, keys[*v as usize], "pair must stay associated");
    }

    // Stability: equal keys keep ascending original indices.
    for w in sorted_keys[pad_count..]
        .iter()
        .zip(&sorted_values[pad_count..])
        .collect::<Vec<_>>()
        .windows(2)
    {
        if w[0].0 == w[1].0 {
            assert!(w[0].1 < w[1].1, "equal keys must preserve input order");
        }
    }
}
