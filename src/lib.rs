#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod api;
pub mod convert;
pub mod locate;
pub mod lock;
pub mod patcher;
pub mod scan;
