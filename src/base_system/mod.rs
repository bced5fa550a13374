#![allow(dead_code)]

pub mod config;
pub mod context;
pub mod logging;
pub mod memo;
pub mod retry;
