pub mod lmtp;
pub mod sasl;
