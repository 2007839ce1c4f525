pub mod adapter;
pub mod btle_radio;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod session;
pub mod types;
