pub mod clock;
pub mod config;
pub mod detectors;
pub mod dsp;
pub mod inference;
pub mod registers;
pub mod scheduler;
pub mod slots;
pub mod telemetry;
pub mod validate;
