//! Wire protocols.

pub mod rpc;
