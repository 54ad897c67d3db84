// Services module - Business logic

pub mod attendance;
pub mod credential;
pub mod entitlement_store;
pub mod issuance;
pub mod lookup;
pub mod qr_generator;
pub mod scan_engine;
pub mod scanner;
pub mod signature;

#[cfg(test)]
pub(crate) mod testing;
