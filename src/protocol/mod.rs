//! Protocol definitions for ELM327 communication.
//!
//! This module contains the wire-level pieces of the link:
//! - Command text and AT/OBD vocabulary
//! - Response assembly and cleanup
//! - Mode 01 parameter decoding
//! - Mode 03 trouble-code decoding

pub mod command;
pub mod dtc;
pub mod pid;
pub mod response;

pub use command::{CR, Command, ObdProtocol, PROMPT, at, mode};
pub use pid::Parameter;
pub use response::{RawResponse, ResponseAssembler};
