//! PI30 protocol: query frames, response parsers and the serial transport.

pub mod command;
pub mod packet;
pub mod session;
