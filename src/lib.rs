//! the crate cnn_accel is a simulator of a tiled fixed point cnn accelerator and of the host side
//! sequencer that drives it layer by layer.
//! there are 5 parts in the crate:
//!
//! - accelerator: the device. fixed point arithmetic, tiling, convolution, fusion, pooling and the register file.
//! - layer and network: the layer descriptor and the ordered layer table of a network.
//! - sequencer: the start/poll/done handshake that runs one layer on a device.
//! - runner: the ping-pong memory map and the loop over all layers.
//! - statistics: the result statistics to record the result.
//! # Examples
//! ```
//! use chrono::Local;
//! use cnn_accel::{runner, utils, CnnAccelResult, Settings};
//! fn test_system() -> Result<(), Box<dyn std::error::Error>> {
//!     utils::init_log();
//!     let current_time: String = Local::now().format("%Y-%m-%d-%H-%M-%S%.6f").to_string();
//!     let mut results = CnnAccelResult::default();
//!
//!     let settings = Settings::new(vec!["configs/default.toml".into()])?;
//!     results.settings = Some(settings.clone());
//!     // create the folder for output
//!     std::fs::create_dir_all("output")?;
//!
//!     // run the network
//!     let stat = runner::simulate(&settings)?;
//!     results.stats = Some(stat);
//!
//!     let output_path = format!("output/{}.json", current_time);
//!     // write json of results to output_path
//!     std::fs::write(output_path, serde_json::to_string_pretty(&results)?)?;
//!     Ok(())
//! }
//! match test_system() {
//!     Ok(_) => println!("test_system success"),
//!     Err(e) => println!("test_system failed: {}", e),
//! }
//! ```

pub mod accelerator;
pub mod cmd_args;
pub mod error;
pub mod layer;
pub mod network;
pub mod reference;
pub mod runner;
pub mod sequencer;
pub mod settings;
pub mod sim_result;
pub mod tensor;
// default re-export
pub use accelerator::{CnnAccelerator, RegisterInterface};
pub use error::{AccelError, ConfigError, ProtocolError};
pub use layer::{LayerAddresses, LayerDescriptor, LayerKind};
pub use network::NetworkTable;
pub use sequencer::{LayerSequencer, SequencerState};
pub use settings::Settings;
pub use sim_result::{CnnAccelResult, CnnStatistics};

pub mod utils;
