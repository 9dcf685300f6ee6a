#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

mod config;
mod controller;
mod dispatcher;
mod error;
mod handle;
pub mod poll;
mod socket;

pub use {
    crate::{
        config::DispatcherConfig,
        controller::ViscaController,
        dispatcher::Dispatcher,
        error::Error,
        handle::{EntryId, Handle, Response},
        socket::EntryState,
    },
    visca_protocol as protocol,
};

/// Result type.
pub type Result<T = ()> = std::result::Result<T, Error>;
