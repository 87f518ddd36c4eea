//! Communication plumbing used by the registry: transport, wire codec, exchanges.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
pub use exchange::{agree_on_failure, all_to_all};
