//! App and Chassis network function command handlers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::AUTH_NONE;
use crate::router::{CommandHandler, Request};
use crate::target::{ManagedTargets, TargetError};
use crate::types::{BootDevice, ChassisControl, PowerState, RawResponse};

/// IPMI completion codes used by this server.
pub mod completion {
    /// Command completed normally.
    pub const OK: u8 = 0x00;
    /// Parameter not supported (boot option queries).
    pub const PARAMETER_NOT_SUPPORTED: u8 = 0x80;
    /// Invalid or unrecognized command.
    pub const INVALID_COMMAND: u8 = 0xC1;
    /// Timeout while processing the command.
    pub const TIMEOUT: u8 = 0xC3;
    /// Invalid data field in request.
    pub const INVALID_DATA_FIELD: u8 = 0xCC;
    /// Destination unavailable (no such target).
    pub const DESTINATION_UNAVAILABLE: u8 = 0xD3;
    /// Unspecified error.
    pub const UNSPECIFIED: u8 = 0xFF;
}

/// App (NetFn 0x06) command numbers.
mod app_cmd {
    pub const GET_DEVICE_ID: u8 = 0x01;
    pub const GET_CHANNEL_AUTH_CAPABILITIES: u8 = 0x38;
    pub const GET_SESSION_CHALLENGE: u8 = 0x39;
    pub const ACTIVATE_SESSION: u8 = 0x3A;
    pub const SET_SESSION_PRIVILEGE_LEVEL: u8 = 0x3B;
    pub const CLOSE_SESSION: u8 = 0x3C;
}

/// Chassis (NetFn 0x00) command numbers.
mod chassis_cmd {
    pub const GET_CHASSIS_STATUS: u8 = 0x01;
    pub const CHASSIS_CONTROL: u8 = 0x02;
    pub const SET_SYSTEM_BOOT_OPTIONS: u8 = 0x08;
    pub const GET_SYSTEM_BOOT_OPTIONS: u8 = 0x09;
}

/// Boot option parameter carrying the boot flags (device selector).
const BOOT_FLAGS_PARAMETER: u8 = 0x05;

/// Session id and initial sequence handed out by the single-session
/// "none"-auth exchange.
const SESSION_ID: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Handles the unauthenticated session-establishment commands a console
/// issues before chassis control.
///
/// Auth type is always "none", so session setup is pure acknowledgment:
/// every recognized command answers success with a fixed body, and
/// anything else answers `INVALID_COMMAND`.
#[derive(Debug, Default)]
pub struct AppHandler;

impl AppHandler {
    fn respond(&self, request: &Request<'_>) -> RawResponse {
        match request.command {
            app_cmd::GET_DEVICE_ID => RawResponse::success(device_id_body().to_vec()),
            app_cmd::GET_CHANNEL_AUTH_CAPABILITIES => {
                let channel = request.data.first().copied().unwrap_or(0x0E) & 0x0F;
                // Auth type "none" only, IPMI v1.5, no OEM auth data.
                RawResponse::success(vec![channel, 0x01, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00])
            }
            app_cmd::GET_SESSION_CHALLENGE => {
                let mut body = Vec::with_capacity(20);
                body.extend_from_slice(&SESSION_ID);
                body.extend_from_slice(&[0u8; 16]);
                RawResponse::success(body)
            }
            app_cmd::ACTIVATE_SESSION => {
                let mut body = Vec::with_capacity(10);
                body.push(AUTH_NONE);
                body.extend_from_slice(&SESSION_ID);
                body.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
                body.push(0x04); // administrator
                RawResponse::success(body)
            }
            app_cmd::SET_SESSION_PRIVILEGE_LEVEL => {
                let level = request.data.first().copied().unwrap_or(0x04) & 0x0F;
                RawResponse::success(vec![level])
            }
            app_cmd::CLOSE_SESSION => RawResponse::completion(completion::OK),
            other => {
                debug!(command = other, "unrecognized App command");
                RawResponse::completion(completion::INVALID_COMMAND)
            }
        }
    }
}

impl CommandHandler for AppHandler {
    fn handle<'a>(
        &'a self,
        request: Request<'a>,
    ) -> Pin<Box<dyn Future<Output = RawResponse> + Send + 'a>> {
        Box::pin(async move { self.respond(&request) })
    }
}

/// Get Device ID body: a v1.5 BMC with chassis device support and no
/// manufacturer identity.
fn device_id_body() -> [u8; 15] {
    [
        0x20, // device id
        0x01, // device revision
        0x01, // firmware major
        0x00, // firmware minor (BCD)
        0x51, // IPMI version 1.5 (BCD)
        0x80, // additional device support: chassis device
        0x00, 0x00, 0x00, // manufacturer id
        0x00, 0x00, // product id
        0x00, 0x00, 0x00, 0x00, // aux firmware revision
    ]
}

/// Chassis power control for one managed target.
pub struct ChassisHandler {
    targets: Arc<dyn ManagedTargets>,
    name: String,
    backend_timeout: Duration,
}

impl ChassisHandler {
    /// Create a handler driving `name` through `targets`, with each
    /// backend call bounded by `backend_timeout`.
    pub fn new(targets: Arc<dyn ManagedTargets>, name: String, backend_timeout: Duration) -> Self {
        Self {
            targets,
            name,
            backend_timeout,
        }
    }

    async fn respond(&self, request: Request<'_>) -> RawResponse {
        match request.command {
            chassis_cmd::GET_CHASSIS_STATUS => self.status().await,
            chassis_cmd::CHASSIS_CONTROL => self.control(request.data.first().copied()).await,
            chassis_cmd::SET_SYSTEM_BOOT_OPTIONS => self.set_boot_options(request.data).await,
            chassis_cmd::GET_SYSTEM_BOOT_OPTIONS => self.get_boot_options(request.data).await,
            other => {
                debug!(command = other, "unrecognized Chassis command");
                RawResponse::completion(completion::INVALID_COMMAND)
            }
        }
    }

    async fn status(&self) -> RawResponse {
        match self.call(|targets, name| targets.query(name)).await {
            Ok(state) => {
                // Byte 1: current power state (bit 0) and power restore
                // policy "previous" (bits 6:5). Bytes 2 and 3: last
                // power event and chassis state, all clear.
                let power = u8::from(state == PowerState::Running);
                RawResponse::success(vec![0x20 | power, 0x00, 0x00])
            }
            Err(err) => self.failure("get chassis status", err),
        }
    }

    async fn control(&self, op: Option<u8>) -> RawResponse {
        let Some(op) = op else {
            return RawResponse::completion(completion::INVALID_DATA_FIELD);
        };
        let Some(control) = ChassisControl::from_u8(op) else {
            debug!(instance = %self.name, op, "invalid chassis control value");
            return RawResponse::completion(completion::INVALID_DATA_FIELD);
        };

        let outcome = match control {
            ChassisControl::PowerDown => self.call(|targets, name| targets.power_off(name)).await,
            ChassisControl::PowerUp => self.call(|targets, name| targets.power_on(name)).await,
            ChassisControl::PowerCycle => {
                self.call(|targets, name| {
                    targets.power_off(name)?;
                    targets.power_on(name)
                })
                .await
            }
            ChassisControl::HardReset
            | ChassisControl::PulseDiagnostic
            | ChassisControl::AcpiSoft => {
                debug!(instance = %self.name, ?control, "chassis control not supported");
                return RawResponse::completion(completion::INVALID_DATA_FIELD);
            }
        };

        match outcome {
            Ok(()) => RawResponse::completion(completion::OK),
            Err(err) => self.failure("chassis control", err),
        }
    }

    async fn set_boot_options(&self, data: &[u8]) -> RawResponse {
        let Some(&selector) = data.first() else {
            return RawResponse::completion(completion::INVALID_DATA_FIELD);
        };
        // Bit 7 marks the parameter invalid/locked; the selector is the
        // low 7 bits. Parameters other than the boot flags are accepted
        // and ignored so consoles can run their usual sequence.
        if selector & 0x7F != BOOT_FLAGS_PARAMETER {
            return RawResponse::completion(completion::OK);
        }
        if data.len() < 3 {
            return RawResponse::completion(completion::INVALID_DATA_FIELD);
        }

        let device_bits = (data[2] >> 2) & 0x0F;
        let Some(device) = BootDevice::from_selector(device_bits) else {
            warn!(instance = %self.name, device_bits, "unsupported boot device selector");
            return RawResponse::completion(completion::INVALID_DATA_FIELD);
        };

        match self
            .call(move |targets, name| targets.set_boot_device(name, device))
            .await
        {
            Ok(()) => RawResponse::completion(completion::OK),
            Err(err) => self.failure("set boot options", err),
        }
    }

    async fn get_boot_options(&self, data: &[u8]) -> RawResponse {
        let Some(&selector) = data.first() else {
            return RawResponse::completion(completion::INVALID_DATA_FIELD);
        };
        if selector & 0x7F != BOOT_FLAGS_PARAMETER {
            return RawResponse::completion(completion::PARAMETER_NOT_SUPPORTED);
        }

        match self.call(|targets, name| targets.boot_override(name)).await {
            Ok(staged) => {
                let (valid, device_bits) = match staged {
                    Some(device) => (0x80, device.as_selector() << 2),
                    None => (0x00, 0x00),
                };
                RawResponse::success(vec![
                    0x01, // parameter version
                    BOOT_FLAGS_PARAMETER,
                    valid,
                    device_bits,
                    0x00,
                    0x00,
                    0x00,
                ])
            }
            Err(err) => self.failure("get boot options", err),
        }
    }

    /// Run one backend call off the async runtime with a bounded wait,
    /// so a hung backend still yields a completion code.
    async fn call<T, F>(&self, f: F) -> Result<T, TargetError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ManagedTargets, &str) -> Result<T, TargetError> + Send + 'static,
    {
        let targets = Arc::clone(&self.targets);
        let name = self.name.clone();
        let task = tokio::task::spawn_blocking(move || f(targets.as_ref(), &name));

        match tokio::time::timeout(self.backend_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(_join)) => Err(TargetError::Failed),
            Err(_elapsed) => Err(TargetError::Timeout),
        }
    }

    fn failure(&self, what: &'static str, err: TargetError) -> RawResponse {
        warn!(instance = %self.name, what, %err, "chassis command failed");
        RawResponse::completion(match err {
            TargetError::NotFound => completion::DESTINATION_UNAVAILABLE,
            TargetError::Timeout => completion::TIMEOUT,
            TargetError::Failed => completion::UNSPECIFIED,
        })
    }
}

impl CommandHandler for ChassisHandler {
    fn handle<'a>(
        &'a self,
        request: Request<'a>,
    ) -> Pin<Box<dyn Future<Output = RawResponse> + Send + 'a>> {
        Box::pin(self.respond(request))
    }
}
