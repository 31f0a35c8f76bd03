pub mod rpc;
pub mod session;
