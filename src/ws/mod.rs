//! WebSocket (RFC 6455, plus RFC 8441 over HTTP/2) client/server endpoints
//!.
//!
//! Laid out the way [`crate::h2`] splits framing/handshake/extension-seam
//! concerns into their own submodules rather than one large file.

pub mod extension;
pub mod frame;
pub mod handshake;

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::ws::extension::ExtensionChain;
use crate::ws::frame::MessageAssembler;

pub use extension::{ExtensionOffer, Param, WsExtension};
pub use frame::{Frame, FrameDecoder, Message, Opcode, Rsv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The lifecycle states of a [`WebSocketConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    Upgrading,
    Open,
    Error,
    Closed,
}

/// Negotiable values for one WebSocket connection, the WS-specific counterpart to
/// [`crate::h2::H2Config`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Reject any message whose assembled size exceeds this many bytes.
    pub max_message_size: Option<usize>,
    /// Subprotocols this endpoint is willing to offer/accept, in preference
    /// order.
    pub subprotocols: Vec<String>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: Some(64 * 1024 * 1024),
            subprotocols: Vec::new(),
        }
    }
}

/// Which transport is carrying this WebSocket connection.
pub enum Carrier {
    Http1Upgrade,
    H2StreamProxy(crate::h2::StreamProxy),
}

/// A WebSocket connection's protocol-layer state: the frame decoder,
/// message assembler, negotiated extension chain, and lifecycle state. Byte
/// transport (the socket collaborator, or for an H2-carried connection the
/// [`crate::h2::StreamProxy`]) is owned by the caller, not by this type.
pub struct WebSocketConnection {
    role: Role,
    state: State,
    config: WsConfig,
    decoder: FrameDecoder,
    assembler: MessageAssembler,
    extensions: ExtensionChain,
    negotiated_subprotocol: Option<String>,
    origin: Option<String>,
    carrier: Option<Carrier>,
}

impl WebSocketConnection {
    #[must_use]
    pub fn new(role: Role, config: WsConfig) -> Self {
        let require_masked = role == Role::Server;
        Self {
            role,
            state: State::Idle,
            config,
            decoder: FrameDecoder::new(require_masked),
            assembler: MessageAssembler::new(),
            extensions: ExtensionChain::new(),
            negotiated_subprotocol: None,
            origin: None,
            carrier: None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        debug!(?state, "ws connection state transition");
        self.state = state;
    }

    pub fn attach_carrier(&mut self, carrier: Carrier) {
        self.carrier = Some(carrier);
    }

    #[must_use]
    pub fn negotiated_subprotocol(&self) -> Option<&str> {
        self.negotiated_subprotocol.as_deref()
    }

    pub fn set_negotiated_subprotocol(&mut self, proto: Option<String>) {
        self.negotiated_subprotocol = proto;
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn set_origin(&mut self, origin: Option<String>) {
        self.origin = origin;
    }

    pub fn extensions_mut(&mut self) -> &mut ExtensionChain {
        &mut self.extensions
    }

    /// Feed newly-arrived bytes, running them through frame decode, RSV/
    /// length validation, extension transforms (reverse order), and message
    /// assembly. Returns every complete [`Message`] the input produced.
    pub fn receive(&mut self, src: &mut bytes::BytesMut) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        loop {
            let Some(mut frame) = self.decoder.decode(src)? else {
                break;
            };
            let mut payload = frame.payload.to_vec();
            let mut rsv = frame.rsv;
            self.extensions.apply_incoming(frame.opcode, &mut rsv, &mut payload);
            frame.rsv = rsv;
            frame.payload = bytes::Bytes::from(payload);

            if let Some(max) = self.config.max_message_size {
                if frame.payload.len() > max {
                    self.state = State::Error;
                    return Err(Error::new(ErrorKind::BufferTooSmall));
                }
            }

            if let Some(msg) = self.assembler.push(frame)? {
                if let Message::Close { .. } = &msg {
                    self.state = State::Closed;
                }
                out.push(msg);
            }
        }
        Ok(out)
    }

    /// Encode one outgoing message, running it through the extension chain
    /// in declaration order first.
    pub fn send(&mut self, msg: &Message, dst: &mut bytes::BytesMut) {
        let masked = self.role == Role::Client;
        let (opcode, mut payload) = match msg {
            Message::Text(s) => (Opcode::Text, s.as_bytes().to_vec()),
            Message::Binary(b) => (Opcode::Binary, b.to_vec()),
            Message::Ping(b) => (Opcode::Ping, b.to_vec()),
            Message::Pong(b) => (Opcode::Pong, b.to_vec()),
            Message::Close { code, reason } => {
                let mut p = Vec::new();
                if let Some(code) = code {
                    p.extend_from_slice(&code.to_be_bytes());
                    p.extend_from_slice(reason.as_bytes());
                }
                (Opcode::Close, p)
            }
        };
        let mut rsv = Rsv::default();
        if !opcode.is_control() {
            self.extensions.apply_outgoing(opcode, &mut rsv, &mut payload);
        }
        frame::encode_frame(true, rsv, opcode, bytes::Bytes::from(payload), masked, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_starts_idle() {
        let ws = WebSocketConnection::new(Role::Client, WsConfig::default());
        assert_eq!(ws.state(), State::Idle);
    }

    #[test]
    fn client_send_then_server_receive_round_trips_a_text_message() {
        let mut client = WebSocketConnection::new(Role::Client, WsConfig::default());
        let mut server = WebSocketConnection::new(Role::Server, WsConfig::default());
        let mut wire = bytes::BytesMut::new();
        client.send(&Message::Text("hi".into()), &mut wire);
        let messages = server.receive(&mut wire).unwrap();
        assert_eq!(messages, vec![Message::Text("hi".into())]);
    }

    #[test]
    fn oversized_message_is_rejected_and_moves_to_error_state() {
        let mut client = WebSocketConnection::new(Role::Client, WsConfig::default());
        let mut server = WebSocketConnection::new(Role::Server, WsConfig { max_message_size: Some(1), subprotocols: vec![] });
        let mut wire = bytes::BytesMut::new();
        client.send(&Message::Text("too long".into()), &mut wire);
        assert!(server.receive(&mut wire).is_err());
        assert_eq!(server.state(), State::Error);
    }

    #[test]
    fn close_message_moves_connection_to_closed_state() {
        let mut client = WebSocketConnection::new(Role::Client, WsConfig::default());
        let mut server = WebSocketConnection::new(Role::Server, WsConfig::default());
        let mut wire = bytes::BytesMut::new();
        client.send(&Message::Close { code: Some(1000), reason: "bye".into() }, &mut wire);
        server.receive(&mut wire).unwrap();
        assert_eq!(server.state(), State::Closed);
    }
}
