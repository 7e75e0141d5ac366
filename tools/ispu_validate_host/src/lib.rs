//! Host half of the ISPU validation flow.
//!
//! [`session::HostSession`] answers the front-end line protocol by driving
//! the sensor through any `embedded-hal` I2C bus and INT1 pin. The offline
//! helpers in [`offline`] back the command-line tool.

pub mod bus;
pub mod command;
pub mod logging;
pub mod offline;
pub mod session;
pub mod ucf;
