//! Algorithm images that plug into the scheduler. Each reads the raw sensor
//! registers itself and writes its layout starting at `DOUT_00`.

pub mod detect_6d;
pub mod filter;
pub mod free_fall;
pub mod gesture;
pub mod wake_up;

pub use detect_6d::Detect6dSlot;
pub use filter::FilterSlot;
pub use free_fall::FreeFallSlot;
pub use gesture::GestureSlot;
pub use wake_up::WakeUpSlot;

/// Interrupt flag a slot raises after publishing its outputs.
pub(crate) fn slot_flag(slot: usize) -> u32 {
    1 << slot
}

#[cfg(test)]
mod tests;
