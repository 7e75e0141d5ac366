#![cfg_attr(not(test), no_std)]

pub mod firmware;

pub use firmware::{
    registers::{RamRegisterFile, RegisterFile},
    scheduler::Scheduler,
};
