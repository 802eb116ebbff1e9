//! Core configuration types

mod config;

#[cfg(test)]
mod config_tests;

pub use config::{
    Credentials, HttpConfig, HttpConfigBuilder, RtpConfig, RtpConfigBuilder, TransportProto,
};
