//! Route-specific payload records carried in an envelope's `data` field.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the pre-shared application key.
pub const APP_KEY_LEN: usize = 32;

/// Body of an `RMSPingResponse`.
pub const PING_RESPONSE_DATA: [u8; 4] = [0; 4];

/// Integrator application identifier sent at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum AppId {
    RmsServer,
    RmsEmulator,
    Btpp,
    MobilePp,
}

impl TryFrom<i32> for AppId {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(AppId::RmsServer),
            101 => Ok(AppId::RmsEmulator),
            201 => Ok(AppId::Btpp),
            202 => Ok(AppId::MobilePp),
            other => Err(ProtocolError::UnknownAppId(other)),
        }
    }
}

impl From<AppId> for i32 {
    fn from(id: AppId) -> Self {
        match id {
            AppId::RmsServer => 100,
            AppId::RmsEmulator => 101,
            AppId::Btpp => 201,
            AppId::MobilePp => 202,
        }
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppId::RmsServer => write!(f, "RMSServer"),
            AppId::RmsEmulator => write!(f, "RMSEmulator"),
            AppId::Btpp => write!(f, "BTPP"),
            AppId::MobilePp => write!(f, "MobilePP"),
        }
    }
}

/// Numeric error code carried in an [`ErrorPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorId {
    SystemError,
    InvalidLogin,
    InvalidAppKey,
    InvalidAppId,
    InvalidRequest,
    UnroutableMessage,
    InvalidFormat,
    InvalidJwt,
    Unknown(i32),
}

impl ErrorId {
    /// Returns true for codes that reject the caller's credentials.
    pub fn is_authentication(self) -> bool {
        matches!(
            self,
            ErrorId::InvalidLogin | ErrorId::InvalidAppKey | ErrorId::InvalidAppId | ErrorId::InvalidJwt
        )
    }
}

impl From<i32> for ErrorId {
    fn from(code: i32) -> Self {
        match code {
            1 => ErrorId::SystemError,
            2 => ErrorId::InvalidLogin,
            3 => ErrorId::InvalidAppKey,
            4 => ErrorId::InvalidAppId,
            5 => ErrorId::InvalidRequest,
            6 => ErrorId::UnroutableMessage,
            7 => ErrorId::InvalidFormat,
            8 => ErrorId::InvalidJwt,
            other => ErrorId::Unknown(other),
        }
    }
}

impl From<ErrorId> for i32 {
    fn from(id: ErrorId) -> Self {
        match id {
            ErrorId::SystemError => 1,
            ErrorId::InvalidLogin => 2,
            ErrorId::InvalidAppKey => 3,
            ErrorId::InvalidAppId => 4,
            ErrorId::InvalidRequest => 5,
            ErrorId::UnroutableMessage => 6,
            ErrorId::InvalidFormat => 7,
            ErrorId::InvalidJwt => 8,
            ErrorId::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorId::SystemError => write!(f, "SystemError"),
            ErrorId::InvalidLogin => write!(f, "InvalidLogin"),
            ErrorId::InvalidAppKey => write!(f, "InvalidAppKey"),
            ErrorId::InvalidAppId => write!(f, "InvalidAppID"),
            ErrorId::InvalidRequest => write!(f, "InvalidRequest"),
            ErrorId::UnroutableMessage => write!(f, "UnroutableMessage"),
            ErrorId::InvalidFormat => write!(f, "InvalidFormat"),
            ErrorId::InvalidJwt => write!(f, "InvalidJWT"),
            ErrorId::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// `Login` request body.
///
/// Carries exactly one credential form: username and password, or the
/// certificate issued by a previous password login. Use [`LoginPayload::password`]
/// or [`LoginPayload::certificate`] to build one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPayload {
    #[serde(rename = "Username", default)]
    pub username: Option<String>,

    #[serde(rename = "Password", default)]
    pub password: Option<String>,

    #[serde(rename = "AppID")]
    pub app_id: AppId,

    #[serde(rename = "AppKey", with = "crate::serde_b64")]
    pub app_key: Vec<u8>,

    #[serde(rename = "ClientCertificate", default, with = "crate::serde_b64::option")]
    pub client_certificate: Option<Vec<u8>>,
}

impl LoginPayload {
    /// Phase-one login with username and password.
    pub fn password(
        username: impl Into<String>,
        password: impl Into<String>,
        app_id: AppId,
        app_key: Vec<u8>,
    ) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            app_id,
            app_key,
            client_certificate: None,
        }
    }

    /// Phase-two login presenting the issued certificate.
    pub fn certificate(certificate: Vec<u8>, app_id: AppId, app_key: Vec<u8>) -> Self {
        Self {
            username: None,
            password: None,
            app_id,
            app_key,
            client_certificate: Some(certificate),
        }
    }

    pub fn is_certificate_login(&self) -> bool {
        self.client_certificate.is_some()
    }

    /// Checks that exactly one credential form is present and the app key
    /// has the expected length.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let has_password = self.username.is_some() || self.password.is_some();
        match (has_password, self.client_certificate.as_ref()) {
            (true, Some(_)) => {
                return Err(ProtocolError::InvalidPayload(
                    "login carries both password and certificate".into(),
                ))
            }
            (false, None) => {
                return Err(ProtocolError::InvalidPayload(
                    "login carries no credentials".into(),
                ))
            }
            (false, Some(cert)) if cert.is_empty() => {
                return Err(ProtocolError::InvalidPayload(
                    "login certificate is empty".into(),
                ))
            }
            (true, None) if self.username.is_none() || self.password.is_none() => {
                return Err(ProtocolError::InvalidPayload(
                    "login needs both username and password".into(),
                ))
            }
            _ => {}
        }
        if self.app_key.len() != APP_KEY_LEN {
            return Err(ProtocolError::InvalidPayload(format!(
                "app key must be {} bytes, got {}",
                APP_KEY_LEN,
                self.app_key.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for LoginPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginPayload")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .field(
                "client_certificate",
                &self.client_certificate.as_ref().map(|c| c.len()),
            )
            .finish()
    }
}

/// `LoginResponse` body.
///
/// Only `ClientCertificate` is used by the client; the remaining fields are
/// kept for logging.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginResponsePayload {
    #[serde(rename = "NodeAuth")]
    pub node_auth: String,

    #[serde(rename = "ClientCertificate", with = "crate::serde_b64")]
    pub client_certificate: Vec<u8>,

    #[serde(rename = "ServerCertInfo")]
    pub server_cert_info: String,

    #[serde(rename = "MtuBluetooth")]
    pub mtu_bluetooth: i32,

    #[serde(rename = "MtuOpl")]
    pub mtu_opl: i32,

    #[serde(rename = "MtuMts")]
    pub mtu_mts: i32,
}

impl fmt::Debug for LoginResponsePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponsePayload")
            .field("node_auth", &self.node_auth)
            .field("client_certificate_len", &self.client_certificate.len())
            .field("server_cert_info", &self.server_cert_info)
            .field("mtu_bluetooth", &self.mtu_bluetooth)
            .field("mtu_opl", &self.mtu_opl)
            .field("mtu_mts", &self.mtu_mts)
            .finish()
    }
}

/// One-way command addressed to a room-level device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplPayload {
    #[serde(rename = "RoomId", alias = "RoomID")]
    pub room_id: String,

    #[serde(
        rename = "ProxyMACAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_mac_address: Option<String>,

    #[serde(rename = "data", alias = "Data", default, with = "crate::serde_b64")]
    pub data: Vec<u8>,
}

impl OplPayload {
    pub fn new(room_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            room_id: room_id.into(),
            proxy_mac_address: None,
            data,
        }
    }

    pub fn with_proxy(mut self, mac: impl Into<String>) -> Self {
        self.proxy_mac_address = Some(mac.into());
        self
    }
}

/// Body of an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "MtsError")]
    pub code: ErrorId,

    #[serde(rename = "MtsErrorMessage", default)]
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorId, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
