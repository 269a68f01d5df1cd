//! Inbound envelope routing.
//!
//! The dispatcher is pure: it decides what to do with an envelope and the
//! caller performs the action on the active connection.

use mts_protocol::{
    Envelope, EnvelopeHeader, ErrorId, ErrorPayload, OplPayload, ProtocolError, Route,
    PING_RESPONSE_DATA, PROTOCOL_VERSION,
};

/// Inbound traffic surfaced to subscribers.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// One-way OPL message from the server.
    Opl(Envelope),
    /// A reply that did not match the in-flight request.
    Reply(Envelope),
    /// An error envelope not addressed to a pending request.
    ServerError(Envelope),
    /// A `LoginResponse` received outside the handshake.
    UnexpectedLoginResponse(Envelope),
}

impl InboundEvent {
    pub fn envelope(&self) -> &Envelope {
        match self {
            InboundEvent::Opl(env)
            | InboundEvent::Reply(env)
            | InboundEvent::ServerError(env)
            | InboundEvent::UnexpectedLoginResponse(env) => env,
        }
    }

    /// Decodes the OPL body, if this is an OPL event.
    pub fn opl(&self) -> Option<Result<OplPayload, ProtocolError>> {
        match self {
            InboundEvent::Opl(env) => Some(env.decode_data()),
            _ => None,
        }
    }

    /// Decodes the error body, if this is a server error.
    pub fn error(&self) -> Option<Result<ErrorPayload, ProtocolError>> {
        match self {
            InboundEvent::ServerError(env) => Some(env.decode_data()),
            _ => None,
        }
    }
}

/// What to do with one inbound envelope.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send this envelope back on the same connection.
    Respond(Envelope),
    /// Hand to subscribers; no response.
    Relay(InboundEvent),
    /// Feed to the login handshake.
    LoginResponse(Envelope),
    /// Correlate with the in-flight request by `rpcId`.
    Reply(Envelope),
}

/// Routes inbound envelopes.
pub struct Dispatcher;

impl Dispatcher {
    /// Decides how to handle `envelope`.
    pub fn dispatch(envelope: Envelope) -> Result<Action, ProtocolError> {
        if envelope.version != PROTOCOL_VERSION {
            tracing::warn!(
                "Unsupported envelope version {} (route={}, rpc_id={})",
                envelope.version,
                envelope.route,
                envelope.rpc_id
            );
            let response = envelope.error_response(
                ErrorId::InvalidFormat,
                ProtocolError::UnsupportedVersion(envelope.version).to_string(),
                envelope.route,
            )?;
            return Ok(Action::Respond(response));
        }

        let route = envelope.route;
        match route {
            Route::LoginResponse => Ok(Action::LoginResponse(envelope)),
            Route::Opl => Ok(Action::Relay(InboundEvent::Opl(envelope))),
            Route::RmsPing => {
                let response = envelope
                    .response(Route::RmsPingResponse, PING_RESPONSE_DATA.to_vec())
                    .with_jwt(envelope.jwt.clone());
                Ok(Action::Respond(response))
            }
            _ if envelope.reply => Ok(Action::Reply(envelope)),
            Route::ErrorResponse => Ok(Action::Relay(InboundEvent::ServerError(envelope))),
            _ if envelope.is_error => Ok(Action::Relay(InboundEvent::ServerError(envelope))),
            _ => {
                tracing::warn!(
                    "Unhandled route {} (code {}) rpc_id={}, answering InvalidRequest",
                    route,
                    route.code(),
                    envelope.rpc_id
                );
                let response = envelope.error_response(
                    ErrorId::InvalidRequest,
                    ErrorId::InvalidRequest.to_string(),
                    route,
                )?;
                Ok(Action::Respond(response))
            }
        }
    }

    /// Decodes a raw frame payload and dispatches it.
    ///
    /// A payload that is not a valid envelope but still carries addressing
    /// fields is answered with `InvalidFormat`. Anything else is an error the
    /// caller must treat as connection-fatal.
    pub fn dispatch_frame(payload: &[u8]) -> Result<Action, ProtocolError> {
        match serde_json::from_slice::<Envelope>(payload) {
            Ok(envelope) => Self::dispatch(envelope),
            Err(err) => {
                let header: EnvelopeHeader = serde_json::from_slice(payload).map_err(|_| err)?;
                tracing::warn!(
                    "Malformed envelope rpc_id={}, answering InvalidFormat",
                    header.rpc_id
                );
                let route = header.route.unwrap_or(Route::ErrorResponse);
                let response = header.error_response(
                    ErrorId::InvalidFormat,
                    ErrorId::InvalidFormat.to_string(),
                    route,
                )?;
                Ok(Action::Respond(response))
            }
        }
    }
}
