#![doc = include_str!("../README.md")]

mod acceptor;
mod config;
mod dispatcher;
mod error;
mod handler;
mod handoff;
mod harness;
mod http;
mod overload;
mod pool;
mod shutdown;
mod stats;
mod stop;
mod worker;

pub use crate::config::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::handler::*;
pub use crate::handoff::*;
pub use crate::http::*;
pub use crate::overload::*;
pub use crate::shutdown::{ComponentReport, Outcome, Phase, ShutdownReport};
pub use crate::stats::*;
