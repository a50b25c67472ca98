use cnn_accel::{
    accelerator::{
        fixed_point::Data,
        memory::DeviceMemory,
        registers::{
            RegisterFile, AP_DONE, AP_IDLE, AP_START, REG_AP_CTRL, REG_STATUS,
            STATUS_CONFIG_REJECTED,
        },
        tile_scheduler::TileScheduler,
        CnnAccelerator, RegisterInterface,
    },
    error::{AccelError, ConfigError},
    layer::{LayerAddresses, LayerDescriptor, LayerKind},
    network::NetworkTable,
    runner::{simulate, NetworkRunner, Workload},
    sequencer::{LayerSequencer, SequencerState},
    settings::{AcceleratorSettings, MemorySettings, Settings},
    utils,
};
use std::error::Error;

const INPUT: u64 = 0x1000;
const OUTPUT: u64 = 0x2000;
const WEIGHTS: u64 = 0x3000;
const NORM: u64 = 0x4000;

fn device(settings: &AcceleratorSettings) -> Result<CnnAccelerator, ConfigError> {
    let mut memory = DeviceMemory::new();
    for base in [INPUT, OUTPUT, WEIGHTS, NORM] {
        memory.map_region(base, 0x1000)?;
    }
    Ok(CnnAccelerator::new(settings, memory))
}

fn addresses() -> LayerAddresses {
    LayerAddresses {
        input: INPUT,
        output: OUTPUT,
        weights: WEIGHTS,
        norm_scale: NORM,
        norm_shift: NORM + 0x800,
    }
}

#[test]
fn test_done_only_after_the_last_step() -> Result<(), AccelError> {
    utils::init_log();
    let settings = AcceleratorSettings {
        tile_capacity: 32,
        ..Default::default()
    };
    let desc = LayerDescriptor::new(LayerKind::ConvOnly, 2, 4, 8, 8, 3, 1, 1);
    let steps = TileScheduler::new(&desc, &settings, 0)?.num_steps() as u64;
    assert!(steps > 1);

    let mut seq = LayerSequencer::new(device(&settings)?, &settings);
    seq.configure(&desc, &addresses())?;
    seq.start()?;
    for _ in 1..steps {
        assert!(!seq.poll_done()?);
        assert_eq!(seq.state(), SequencerState::Running);
    }
    assert!(seq.poll_done()?);
    assert_eq!(seq.state(), SequencerState::Idle);
    assert_eq!(seq.device().counters().cycles, steps);

    // the read inside poll_done cleared DONE
    let ctrl = seq.device_mut().read_reg(REG_AP_CTRL);
    assert_eq!(ctrl & AP_DONE, 0);
    assert_ne!(ctrl & AP_IDLE, 0);
    Ok(())
}

#[test]
fn test_back_to_back_layers() -> Result<(), AccelError> {
    utils::init_log();
    let settings = AcceleratorSettings::default();
    let desc = LayerDescriptor::new(LayerKind::ConvBnAct, 2, 2, 4, 4, 1, 1, 0);
    let mut seq = LayerSequencer::new(device(&settings)?, &settings);
    let memory = seq.device_mut().memory_mut();
    memory.upload(INPUT, &[Data::ONE; 32])?;
    memory.upload(WEIGHTS, &[Data::ONE, Data::ZERO, Data::ZERO, Data::ONE])?;
    memory.upload(NORM, &[Data::ONE; 2])?;
    seq.run_layer(&desc, &addresses())?;
    let second = LayerAddresses {
        input: OUTPUT,
        output: INPUT,
        ..addresses()
    };
    seq.run_layer(&desc, &second)?;
    let out = seq.device().memory().download(INPUT, 32)?;
    assert!(out.iter().all(|x| *x == Data::ONE));
    Ok(())
}

#[test]
fn test_configuration_errors_are_reported_before_compute() -> Result<(), ConfigError> {
    let settings = AcceleratorSettings::default();
    let mut seq = LayerSequencer::new(device(&settings)?, &settings);
    let bad_kernel = LayerDescriptor::new(LayerKind::ConvOnly, 2, 2, 4, 4, 5, 1, 0);
    assert_eq!(
        seq.configure(&bad_kernel, &addresses()),
        Err(ConfigError::UnsupportedKernel(5).into())
    );
    let odd = LayerDescriptor::new(LayerKind::ConvBnActPool, 2, 2, 5, 5, 3, 1, 1);
    assert_eq!(
        seq.configure(&odd, &addresses()),
        Err(ConfigError::OddPoolDimensions {
            height: 5,
            width: 5
        }
        .into())
    );
    let tiny = AcceleratorSettings {
        tile_capacity: 4,
        ..Default::default()
    };
    let mut seq = LayerSequencer::new(device(&tiny)?, &tiny);
    let desc = LayerDescriptor::new(LayerKind::ConvOnly, 2, 2, 4, 4, 3, 1, 1);
    assert_eq!(
        seq.configure(&desc, &addresses()),
        Err(ConfigError::TileDoesNotFit {
            required: 9,
            capacity: 4
        }
        .into())
    );
    assert_eq!(seq.state(), SequencerState::Idle);
    assert_eq!(seq.device().counters().cycles, 0);
    Ok(())
}

#[test]
fn test_addresses_at_the_end_of_the_address_space() -> Result<(), ConfigError> {
    let settings = AcceleratorSettings::default();
    let desc = LayerDescriptor::new(LayerKind::ConvOnly, 1, 1, 4, 4, 1, 1, 0);
    let addrs = LayerAddresses {
        input: u64::MAX - 1,
        ..addresses()
    };
    let mut seq = LayerSequencer::new(device(&settings)?, &settings);
    assert_eq!(
        seq.configure(&desc, &addrs),
        Err(ConfigError::AddressOverflow(u64::MAX - 1).into())
    );
    assert_eq!(seq.state(), SequencerState::Idle);

    // the same job written straight into the registers is rejected by the device
    let mut accel = seq.into_device();
    for (offset, value) in RegisterFile::encode(&desc, &addrs) {
        accel.write_reg(offset, value);
    }
    accel.write_reg(REG_AP_CTRL, AP_START);
    assert_ne!(accel.read_reg(REG_AP_CTRL) & AP_DONE, 0);
    assert_eq!(accel.read_reg(REG_STATUS), STATUS_CONFIG_REJECTED);
    Ok(())
}

#[test]
fn test_ping_pong_addresses() -> Result<(), AccelError> {
    utils::init_log();
    let table = NetworkTable::from_descriptors(
        "three",
        &[
            LayerDescriptor::new(LayerKind::ConvBnActPool, 3, 8, 16, 16, 3, 1, 1),
            LayerDescriptor::new(LayerKind::ConvBnAct, 8, 8, 8, 8, 3, 2, 1),
            LayerDescriptor::new(LayerKind::ConvOnly, 8, 4, 4, 4, 1, 1, 0),
        ],
    )?;
    let workload = Workload::synthetic(&table, 11);
    let mut runner = NetworkRunner::new(
        table,
        &AcceleratorSettings::default(),
        &MemorySettings::default(),
    )?;
    runner.load(&workload)?;
    let run = runner.run()?;
    for pair in run.layers.windows(2) {
        assert_eq!(pair[1].input_addr, pair[0].output_addr);
        assert_ne!(pair[1].input_addr, pair[1].output_addr);
    }
    assert_eq!(run.output_addr, run.layers[2].output_addr);
    assert_eq!(run.output.shape().as_tuple(), (4, 4, 4));
    Ok(())
}

#[test]
fn test_simulate_default_config() -> Result<(), Box<dyn Error>> {
    utils::init_log();
    let settings = Settings::new(vec!["configs/default.toml".into()])?;
    let stat = simulate(&settings)?;
    assert_eq!(stat.network, "tiny");
    assert_eq!(stat.layers.len(), 3);
    assert!(stat.cycle > 0);
    let error = stat.max_reference_error.unwrap_or(f32::MAX);
    assert!(error < 0.5, "max error {}", error);
    println!("{}", serde_json::to_string_pretty(&stat)?);
    Ok(())
}
