//! Shared vocabulary for the AIUI sandbox: the error taxonomy and the
//! observable sandbox state.

pub mod error;
pub mod state;

pub use error::*;
pub use state::*;
