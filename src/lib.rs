#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A virtual baseboard management controller (BMC).
//!
//! The crate implements:
//! - RMCP framing and the IPMI v1.5 LAN message format (auth type "none")
//! - network-function routing to App and Chassis command handlers
//! - chassis power control and one-shot boot-device overrides against a
//!   registry of managed instances
//!
//! It exposes a small public API (`BmcServer`, `InstanceRegistry`, the
//! `ManagedTargets` capability trait, and the wire codec in
//! [`protocol`]) so backends other than the in-memory registry can be
//! plugged in.

pub mod commands;
mod error;
pub mod protocol;
pub mod router;
pub mod server;
pub mod target;
mod types;

pub use crate::error::{Error, Result};
pub use crate::types::{BootDevice, ChassisControl, PowerState, RawResponse};
