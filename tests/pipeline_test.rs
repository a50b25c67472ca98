use cnn_accel::{
    accelerator::fixed_point::Data,
    error::AccelError,
    layer::{LayerDescriptor, LayerKind},
    network::NetworkTable,
    reference,
    runner::{check_layer, NetworkRunner, Workload},
    settings::{AcceleratorSettings, MemorySettings},
    tensor::{NormParams, Shape, Tensor, WeightTensor},
    utils,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_layer(desc: &LayerDescriptor, seed: u64) -> (Tensor<Data>, WeightTensor, NormParams) {
    let mut rng = StdRng::seed_from_u64(seed);
    let input = Tensor::from_fn(desc.input_shape(), |_, _, _| {
        Data::from_f32(rng.gen_range(0.0..1.0))
    });
    let weights = WeightTensor::from_fn(
        desc.out_channels,
        desc.in_channels,
        desc.kernel_size,
        |_, _, _, _| Data::from_f32(rng.gen_range(-0.25..0.25)),
    );
    let scale = (0..desc.out_channels)
        .map(|_| Data::from_f32(rng.gen_range(0.5..1.5)))
        .collect();
    let shift = (0..desc.out_channels)
        .map(|_| Data::from_f32(rng.gen_range(-0.1..0.1)))
        .collect();
    let norm = NormParams::new(scale, shift).unwrap_or_else(|_| NormParams::identity(desc.out_channels));
    (input, weights, norm)
}

fn run_single(
    desc: &LayerDescriptor,
    workload: &Workload,
    settings: &AcceleratorSettings,
) -> Result<Tensor<Data>, AccelError> {
    let table = NetworkTable::from_descriptors("single", &[*desc])?;
    let mut runner = NetworkRunner::new(table, settings, &MemorySettings::default())?;
    runner.load(workload)?;
    Ok(runner.run()?.output)
}

#[test]
fn test_small_layer_matches_reference() -> Result<(), AccelError> {
    utils::init_log();
    let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 3, 16, 8, 8, 3, 1, 1);
    let (input, weights, norm) = random_layer(&desc, 1);
    let error = check_layer(
        &desc,
        &input,
        &weights,
        &norm,
        &AcceleratorSettings::default(),
        &MemorySettings::default(),
    )?;
    assert!(error < 0.5, "max error {}", error);
    Ok(())
}

#[test]
fn test_every_kernel_stride_padding() -> Result<(), AccelError> {
    utils::init_log();
    for kind in [LayerKind::ConvOnly, LayerKind::ConvBnAct] {
        for k in [1, 3] {
            for s in [1, 2] {
                for p in [0, 1] {
                    let desc = LayerDescriptor::new(kind, 4, 6, 6, 6, k, s, p);
                    let (input, weights, norm) = random_layer(&desc, (k * 10 + s * 2 + p) as u64);
                    let error = check_layer(
                        &desc,
                        &input,
                        &weights,
                        &norm,
                        &AcceleratorSettings::default(),
                        &MemorySettings::default(),
                    )?;
                    assert!(error < 0.5, "{:?}: max error {}", desc, error);
                }
            }
        }
    }
    Ok(())
}

#[test]
fn test_tiling_does_not_change_the_result() -> Result<(), AccelError> {
    utils::init_log();
    let desc = LayerDescriptor::new(LayerKind::ConvBnActPool, 8, 12, 10, 10, 3, 1, 1);
    let (input, weights, norm) = random_layer(&desc, 3);
    let workload = Workload {
        input,
        weights: vec![weights],
        norms: vec![norm],
    };
    let large = run_single(&desc, &workload, &AcceleratorSettings::default())?;
    let small = run_single(
        &desc,
        &workload,
        &AcceleratorSettings {
            tile_capacity: 64,
            ..Default::default()
        },
    )?;
    let one_lane = run_single(
        &desc,
        &workload,
        &AcceleratorSettings {
            parallel_out_channels: 1,
            ..Default::default()
        },
    )?;
    assert_eq!(large, small);
    assert_eq!(large, one_lane);
    assert_eq!(large.shape(), Shape::new(12, 5, 5));
    Ok(())
}

fn identity_1x1(channels: usize) -> WeightTensor {
    WeightTensor::from_fn(channels, channels, 1, |oc, ic, _, _| {
        if oc == ic {
            Data::ONE
        } else {
            Data::ZERO
        }
    })
}

#[test]
fn test_max_pool_keeps_the_largest_of_each_window() -> Result<(), AccelError> {
    utils::init_log();
    let desc = LayerDescriptor::new(LayerKind::ConvBnActPool, 16, 16, 8, 8, 1, 1, 0);
    // strictly increasing along rows and columns, the bottom right element of every window wins
    let input = Tensor::from_fn(desc.input_shape(), |c, h, w| {
        Data::from_f32((c * 64 + h * 8 + w) as f32 / 16.0)
    });
    let workload = Workload {
        input: input.clone(),
        weights: vec![identity_1x1(16)],
        norms: vec![NormParams::identity(16)],
    };
    let output = run_single(&desc, &workload, &AcceleratorSettings::default())?;
    assert_eq!(output.shape(), Shape::new(16, 4, 4));
    for c in 0..16 {
        for h in 0..4 {
            for w in 0..4 {
                assert_eq!(output.get(c, h, w), input.get(c, 2 * h + 1, 2 * w + 1));
            }
        }
    }
    Ok(())
}

#[test]
fn test_global_average_pool() -> Result<(), AccelError> {
    utils::init_log();
    let desc =
        LayerDescriptor::new(LayerKind::ConvOnly, 4, 4, 4, 4, 1, 1, 0).with_global_pool();
    let input = Tensor::from_fn(desc.input_shape(), |c, h, w| {
        Data::from_f32((h * 4 + w) as f32 / 4.0 + c as f32)
    });
    let workload = Workload {
        input,
        weights: vec![identity_1x1(4)],
        norms: vec![NormParams::identity(4)],
    };
    let output = run_single(&desc, &workload, &AcceleratorSettings::default())?;
    assert_eq!(output.shape(), Shape::new(4, 1, 1));
    for c in 0..4 {
        assert_eq!(output.get(c, 0, 0).to_f32(), 1.875 + c as f32);
    }
    Ok(())
}

#[test]
fn test_global_average_pool_uneven_planes() -> Result<(), AccelError> {
    utils::init_log();
    for size in [7, 100, 112] {
        let desc = LayerDescriptor::new(LayerKind::ConvOnly, 2, 2, size, size, 1, 1, 0)
            .with_global_pool();
        let input = Tensor::from_fn(desc.input_shape(), |c, h, w| {
            Data::from_f32(1.0 + c as f32 + ((h * 7 + w * 3) % 10) as f32 / 16.0)
        });
        let workload = Workload {
            input: input.clone(),
            weights: vec![identity_1x1(2)],
            norms: vec![NormParams::identity(2)],
        };
        let output = run_single(&desc, &workload, &AcceleratorSettings::default())?;
        let expected = reference::global_avg_pool(&input.to_f32());
        let error = reference::max_abs_diff(&output.to_f32(), &expected);
        assert!(error < 0.01, "plane {}x{}: error {}", size, size, error);
    }
    Ok(())
}
