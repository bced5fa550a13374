pub mod cookies;
pub mod network;
