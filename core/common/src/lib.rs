//! Common utilities and types shared across Capshare modules.
//!
//! This crate holds the error taxonomy every destination failure is mapped
//! into, and the data model exchanged between the destination layer and the
//! application shell.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, ErrorReport, ErrorSink, RecoveryAction, Result, ResultExt};
pub use types::{
    DestinationId, DestinationSettings, Dimensions, SettingValue, ShareFile, ShareOptions,
    ShareResponse,
};
