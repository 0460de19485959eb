//! Network-function routing and response frame construction.
//!
//! The router owns the validation gate in front of the handlers: a
//! request with a bad checksum or an unsupported authentication type is
//! dropped without a response, matching how corrupted or forged frames
//! are treated.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{self, netfn, IpmiMessage, SessionWrapper, AUTH_NONE};
use crate::types::RawResponse;

/// One decoded command presented to a handler.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    /// Command number within the handler's network function.
    pub command: u8,
    /// Request data bytes.
    pub data: &'a [u8],
}

/// A command handler owning one network function.
///
/// A handler always answers: unrecognized commands get a nonzero
/// completion code so the console sees a deterministic reply instead of
/// a timeout.
pub trait CommandHandler: Send + Sync {
    /// Handle one request and produce the response body.
    fn handle<'a>(
        &'a self,
        request: Request<'a>,
    ) -> Pin<Box<dyn Future<Output = RawResponse> + Send + 'a>>;
}

/// Registration table from network function code to handler.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<u8, Box<dyn CommandHandler>>,
}

impl Router {
    /// Create a router with no registered handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for the network function `code`.
    pub fn register(&mut self, code: u8, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(code, handler);
    }

    /// Validate, dispatch, and encode the response for one request.
    ///
    /// Returns `None` when no response should be sent: bad checksums,
    /// unsupported auth type, and network functions without a handler
    /// are all logged and dropped.
    pub async fn dispatch(
        &self,
        wrapper: &SessionWrapper,
        message: &IpmiMessage,
    ) -> Option<Vec<u8>> {
        if wrapper.auth_type != AUTH_NONE {
            warn!(
                auth_type = wrapper.auth_type,
                "dropping request with unsupported authentication type"
            );
            return None;
        }
        if let Err(err) = message.validate_checksums() {
            warn!(%err, "dropping request with invalid checksum");
            return None;
        }

        let code = message.netfn();
        let Some(handler) = self.handlers.get(&code) else {
            match netfn_name(code) {
                Some(name) => debug!(netfn = code, name, "network function not handled, dropping"),
                None => warn!(netfn = code, "unrecognized network function, dropping"),
            }
            return None;
        };

        let response = handler
            .handle(Request {
                command: message.command,
                data: &message.data,
            })
            .await;

        match emit_response(wrapper, message, &response) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(%err, "failed to encode response");
                None
            }
        }
    }
}

/// Build the response message for `request`: addressing and sequence
/// are echoed from the request (per IPMI addressing rules, no swap),
/// the NetFn response bit is set, and the completion code plus data are
/// attached.
pub fn build_response(
    wrapper: &SessionWrapper,
    request: &IpmiMessage,
    response: &RawResponse,
) -> (SessionWrapper, IpmiMessage) {
    let reply_wrapper = SessionWrapper {
        auth_type: wrapper.auth_type,
        sequence: wrapper.sequence,
        session_id: wrapper.session_id,
        message_len: 0,
    };
    let reply = IpmiMessage {
        target_address: request.target_address,
        target_lun: request.target_lun | (netfn::RESPONSE << 2),
        checksum: 0,
        source_address: request.source_address,
        source_lun: request.source_lun,
        command: request.command,
        completion_code: Some(response.completion_code),
        data: response.data.clone(),
        data_checksum: 0,
    };
    (reply_wrapper, reply)
}

/// Serialize the full response datagram for `request`.
pub fn emit_response(
    wrapper: &SessionWrapper,
    request: &IpmiMessage,
    response: &RawResponse,
) -> Result<Vec<u8>> {
    let (reply_wrapper, reply) = build_response(wrapper, request, response);
    protocol::encode_packet(&reply_wrapper, &reply)
}

fn netfn_name(code: u8) -> Option<&'static str> {
    match code {
        netfn::CHASSIS => Some("CHASSIS"),
        netfn::BRIDGE => Some("BRIDGE"),
        netfn::SENSOR_EVENT => Some("SENSOR/EVENT"),
        netfn::APP => Some("APP"),
        netfn::FIRMWARE => Some("FIRMWARE"),
        netfn::STORAGE => Some("STORAGE"),
        netfn::TRANSPORT => Some("TRANSPORT"),
        netfn::GROUP_EXTENSION => Some("GROUP EXTENSION"),
        netfn::OEM_GROUP => Some("OEM GROUP"),
        _ => None,
    }
}
