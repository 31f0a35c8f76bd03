pub mod bootstrap;
pub mod networks;
pub mod provider;
pub mod selector;
pub mod storage;
pub mod theme;
pub mod verifier;
