//! # Description
//! - this module is the accelerator device model
//! - the main sub module is engine, it owns all the components and is driven through registers
//! - read engine.rs for more details
//!
//! # Components
//! - fixed_point: the Q8.8 data and Q16.16 accumulator types used by every stage
//! - tile_scheduler and tile_id: partition a layer into tiles and input channel groups
//! - arena: the on-chip tile buffers
//! - conv, fusion, pooling: the compute stages
//! - memory: the external memory the device reads and writes
//! - registers: the register map and the interface a sequencer drives
//!

pub mod arena;
pub mod conv;
pub mod engine;
pub mod fixed_point;
pub mod fusion;
pub mod memory;
pub mod pooling;
pub mod registers;
pub mod tile_id;
pub mod tile_scheduler;

pub use engine::CnnAccelerator;
pub use registers::RegisterInterface;
