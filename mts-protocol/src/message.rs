//! Envelope model and route table.

use crate::error::ProtocolError;
use crate::payload::{ErrorId, ErrorPayload};
use crate::PROTOCOL_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-endpoint node identifier.
pub type NodeId = i32;

/// Well-known transport-endpoint ids.
pub mod node {
    use super::NodeId;

    pub const MTS_SERVER: NodeId = 1;
    pub const MTS_RMS_SERVER: NodeId = 2;
    pub const MTS_PROVISIONER: NodeId = 3;
}

/// Message type carried in the envelope's `route` field.
///
/// Values outside the table are kept as [`Route::Unknown`] so that inbound
/// envelopes with new routes still decode and can be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Route {
    ErrorResponse,
    UseAttributeRoute,
    Opl,
    Login,
    LoginResponse,
    CommunicationKeyReq,
    PpCommunicationKeys,
    RmsCommunicationKeys,
    RoomsMap,
    Firmware,
    RmsPing,
    RmsPingResponse,
    OplCommands,
    InitializeLock,
    MessageCounter,
    RmsDevices,
    Unknown(i32),
}

impl Route {
    pub fn code(self) -> i32 {
        self.into()
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Route::Unknown(_))
    }
}

impl From<i32> for Route {
    fn from(code: i32) -> Self {
        match code {
            -1 => Route::ErrorResponse,
            0 => Route::UseAttributeRoute,
            1 => Route::Opl,
            2 => Route::Login,
            3 => Route::LoginResponse,
            4 => Route::CommunicationKeyReq,
            5 => Route::PpCommunicationKeys,
            6 => Route::RmsCommunicationKeys,
            7 => Route::RoomsMap,
            8 => Route::Firmware,
            9 => Route::RmsPing,
            10 => Route::RmsPingResponse,
            11 => Route::OplCommands,
            12 => Route::InitializeLock,
            13 => Route::MessageCounter,
            14 => Route::RmsDevices,
            other => Route::Unknown(other),
        }
    }
}

impl From<Route> for i32 {
    fn from(route: Route) -> Self {
        match route {
            Route::ErrorResponse => -1,
            Route::UseAttributeRoute => 0,
            Route::Opl => 1,
            Route::Login => 2,
            Route::LoginResponse => 3,
            Route::CommunicationKeyReq => 4,
            Route::PpCommunicationKeys => 5,
            Route::RmsCommunicationKeys => 6,
            Route::RoomsMap => 7,
            Route::Firmware => 8,
            Route::RmsPing => 9,
            Route::RmsPingResponse => 10,
            Route::OplCommands => 11,
            Route::InitializeLock => 12,
            Route::MessageCounter => 13,
            Route::RmsDevices => 14,
            Route::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::ErrorResponse => write!(f, "ErrorResponse"),
            Route::UseAttributeRoute => write!(f, "UseAttributeRoute"),
            Route::Opl => write!(f, "OPL"),
            Route::Login => write!(f, "Login"),
            Route::LoginResponse => write!(f, "LoginResponse"),
            Route::CommunicationKeyReq => write!(f, "CommunicationKeyReq"),
            Route::PpCommunicationKeys => write!(f, "PPCommunicationKeys"),
            Route::RmsCommunicationKeys => write!(f, "RMSCommunicationKeys"),
            Route::RoomsMap => write!(f, "RoomsMap"),
            Route::Firmware => write!(f, "Firmware"),
            Route::RmsPing => write!(f, "RMSPing"),
            Route::RmsPingResponse => write!(f, "RMSPingResponse"),
            Route::OplCommands => write!(f, "OplCommands"),
            Route::InitializeLock => write!(f, "InitializeLock"),
            Route::MessageCounter => write!(f, "MessageCounter"),
            Route::RmsDevices => write!(f, "RMSDevices"),
            Route::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// One complete protocol message.
///
/// Field order matches the wire order. `attributeRoute` and `jwt` are sent
/// as empty strings when unset, and `data` as base64. On input an explicit
/// `null` reads as the field's zero value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: u8,

    #[serde(default, deserialize_with = "null_as_default")]
    pub attribute_route: String,

    pub route: Route,

    #[serde(default, deserialize_with = "null_as_default")]
    pub src_id: NodeId,

    #[serde(default, deserialize_with = "null_as_default")]
    pub dst_id: NodeId,

    #[serde(default, deserialize_with = "null_as_default")]
    pub rpc_id: i32,

    #[serde(default, deserialize_with = "null_as_default")]
    pub reply: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub jwt: String,

    #[serde(default, with = "crate::serde_b64")]
    pub data: Vec<u8>,

    #[serde(default, alias = "error", deserialize_with = "null_as_default")]
    pub is_error: bool,
}

impl Envelope {
    /// Creates a request envelope with an explicit correlation id.
    ///
    /// Most callers go through [`crate::RpcIdAllocator::build_request`].
    pub fn request(route: Route, src_id: NodeId, dst_id: NodeId, rpc_id: i32, data: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            attribute_route: String::new(),
            route,
            src_id,
            dst_id,
            rpc_id,
            reply: false,
            jwt: String::new(),
            data,
            is_error: false,
        }
    }

    pub fn with_attribute_route(mut self, attribute_route: impl Into<String>) -> Self {
        self.attribute_route = attribute_route.into();
        self
    }

    pub fn with_jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = jwt.into();
        self
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    /// Builds a response to this envelope.
    ///
    /// `srcId`, `dstId` and `rpcId` are copied verbatim (not swapped) and
    /// `reply` is set.
    pub fn response(&self, route: Route, data: Vec<u8>) -> Envelope {
        let mut response = Envelope::request(route, self.src_id, self.dst_id, self.rpc_id, data);
        response.reply = true;
        response
    }

    /// Builds an error response carrying `{MtsError, MtsErrorMessage}`.
    pub fn error_response(
        &self,
        kind: ErrorId,
        message: impl Into<String>,
        route: Route,
    ) -> Result<Envelope, ProtocolError> {
        self.header().error_response(kind, message, route)
    }

    /// Decodes `data` as the route-specific JSON record `T`.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Returns the session token, if one is attached.
    pub fn jwt(&self) -> Option<&str> {
        if self.jwt.is_empty() {
            None
        } else {
            Some(&self.jwt)
        }
    }

    pub fn header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            route: Some(self.route),
            src_id: self.src_id,
            dst_id: self.dst_id,
            rpc_id: self.rpc_id,
            jwt: self.jwt.clone(),
        }
    }
}

/// Addressing fields of an envelope.
///
/// Parsed on its own when a frame is too malformed to decode as a full
/// [`Envelope`], so that an `InvalidFormat` error can still be addressed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeHeader {
    #[serde(default, deserialize_with = "lenient_route")]
    pub route: Option<Route>,
    pub src_id: NodeId,
    pub dst_id: NodeId,
    pub rpc_id: i32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub jwt: String,
}

impl EnvelopeHeader {
    pub fn error_response(
        &self,
        kind: ErrorId,
        message: impl Into<String>,
        route: Route,
    ) -> Result<Envelope, ProtocolError> {
        let payload = ErrorPayload::new(kind, message);
        let data = serde_json::to_vec(&payload)?;
        let mut response = Envelope::request(route, self.src_id, self.dst_id, self.rpc_id, data);
        response.reply = true;
        response.is_error = true;
        response.jwt = self.jwt.clone();
        Ok(response)
    }
}

fn lenient_route<'de, D>(deserializer: D) -> Result<Option<Route>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_i64()
        .and_then(|code| i32::try_from(code).ok())
        .map(Route::from))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().unwrap_or_default().to_string())
}
