//! Remote-driver protocol surface: just enough HTTP-over-UDS to give the
//! Network Builder a real caller.

pub mod protocol;
pub mod server;

pub use server::{Driver, serve};
