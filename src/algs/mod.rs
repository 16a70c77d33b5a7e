//! Message passing and the wire records exchanged between ranks.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{Communicator, ComputeGroup, LocalComm, NoComm};
pub use exchange::exchange_records;
