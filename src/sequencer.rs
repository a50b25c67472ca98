//! # the layer sequencer
//! - drives one device through the register handshake, one layer at a time.
//! - states: `Idle -> Configured -> Running -> Done -> Idle`.
//! - every operation called from the wrong state is rejected with a [`ProtocolError`],
//!   nothing is queued.
//!
//! # Examples
//! ```
//! use cnn_accel::{
//!     accelerator::{memory::DeviceMemory, CnnAccelerator},
//!     layer::{LayerAddresses, LayerDescriptor, LayerKind},
//!     sequencer::{LayerSequencer, SequencerState},
//!     settings::AcceleratorSettings,
//! };
//! let desc = LayerDescriptor::new(LayerKind::ConvOnly, 1, 1, 4, 4, 1, 1, 0);
//! let mut memory = DeviceMemory::new();
//! memory.map_region(0x0, 0x100).unwrap();
//! let settings = AcceleratorSettings::default();
//! let mut seq = LayerSequencer::new(CnnAccelerator::new(&settings, memory), &settings);
//! let addrs = LayerAddresses { input: 0x0, output: 0x40, weights: 0x80, norm_scale: 0xc0, norm_shift: 0xc0 };
//! seq.configure(&desc, &addrs).unwrap();
//! seq.start().unwrap();
//! while !seq.poll_done().unwrap() {}
//! assert_eq!(seq.state(), SequencerState::Idle);
//! ```
use log::{debug, info};
use serde::Serialize;

use crate::{
    accelerator::{
        registers::{
            RegisterFile, AP_DONE, AP_IDLE, AP_START, REG_AP_CTRL, REG_STATUS, STATUS_OK,
        },
        tile_scheduler::TileShape,
        RegisterInterface,
    },
    error::{AccelError, ProtocolError},
    layer::{LayerAddresses, LayerDescriptor},
    settings::AcceleratorSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequencerState {
    Idle,
    Configured,
    Running,
    Done,
}

pub struct LayerSequencer<D: RegisterInterface> {
    device: D,
    settings: AcceleratorSettings,
    state: SequencerState,
    polls: u64,
}

impl<D: RegisterInterface> LayerSequencer<D> {
    pub fn new(device: D, settings: &AcceleratorSettings) -> Self {
        LayerSequencer {
            device,
            settings: settings.clone(),
            state: SequencerState::Idle,
            polls: 0,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// polls issued since the last `start()`
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// # Description
    /// - check the layer and write it into the device registers
    /// - any configuration error is reported here, before the device can start
    pub fn configure(
        &mut self,
        desc: &LayerDescriptor,
        addrs: &LayerAddresses,
    ) -> Result<TileShape, AccelError> {
        if self.state != SequencerState::Idle {
            return Err(ProtocolError::ConfigureWhileBusy(self.state).into());
        }
        let shape = desc.validate(&self.settings)?;
        addrs.check_disjoint(desc)?;
        let ctrl = self.device.read_reg(REG_AP_CTRL);
        if ctrl & AP_IDLE == 0 {
            return Err(ProtocolError::DeviceBusy(ctrl).into());
        }
        for (offset, value) in RegisterFile::encode(desc, addrs) {
            self.device.write_reg(offset, value);
        }
        debug!("configured {:?} with {:?}", desc, addrs);
        self.state = SequencerState::Configured;
        Ok(shape)
    }

    pub fn start(&mut self) -> Result<(), AccelError> {
        if self.state != SequencerState::Configured {
            return Err(ProtocolError::StartWithoutConfigure(self.state).into());
        }
        self.device.write_reg(REG_AP_CTRL, AP_START);
        self.state = SequencerState::Running;
        self.polls = 0;
        Ok(())
    }

    /// # Description
    /// - let the device advance one step, then read the control register once
    /// - the read that observes `AP_DONE` also clears it, the sequencer passes through `Done` back to `Idle`
    /// # Return
    /// - `Ok(true)` when the layer is complete, a non zero device status is an [`AccelError::Device`]
    pub fn poll_done(&mut self) -> Result<bool, AccelError> {
        if self.state != SequencerState::Running {
            return Err(ProtocolError::PollWhileNotRunning(self.state).into());
        }
        self.device.cycle();
        self.polls += 1;
        let ctrl = self.device.read_reg(REG_AP_CTRL);
        if ctrl & AP_DONE == 0 {
            return Ok(false);
        }
        self.state = SequencerState::Done;
        let status = self.device.read_reg(REG_STATUS);
        self.state = SequencerState::Idle;
        if status != STATUS_OK {
            return Err(AccelError::Device(status));
        }
        Ok(true)
    }

    /// poll until done, or fail once `max_poll_cycles` polls went unanswered
    pub fn wait_done(&mut self) -> Result<u64, AccelError> {
        while !self.poll_done()? {
            if self.polls >= self.settings.max_poll_cycles {
                return Err(AccelError::PollLimit(self.polls));
            }
        }
        Ok(self.polls)
    }

    /// configure, start and wait for one layer, returns the number of polls
    pub fn run_layer(
        &mut self,
        desc: &LayerDescriptor,
        addrs: &LayerAddresses,
    ) -> Result<u64, AccelError> {
        self.configure(desc, addrs)?;
        self.start()?;
        let polls = self.wait_done()?;
        info!("layer done after {} polls", polls);
        Ok(polls)
    }
}
