//! HTTP/2 framing engine: frames, the HPACK
//! seam, flow control, the per-stream state machine, the connection
//! multiplexer, the handshake, and the multi-thread stream proxy.

pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod handshake;
pub mod hpack;
pub mod stream;
pub mod stream_proxy;
pub mod stream_state;

pub use connection::{Connection, ConnEvent, H2Config, Role, PREFACE};
pub use error::{H2Error, Initiator, Reason, Scope};
pub use handshake::{Handshake, HandshakeEvent};
pub use hpack::{DecoderError, Header, HpackCodec, PassthroughHpack};
pub use stream::{SendOutcome, Stream, StreamCallbacks, StreamId};
pub use stream_proxy::{cache_key, ProxyState, PushRegistry, SharedConnection, StreamProxy, StreamProxyCallbacks, StreamProxyHandle};
pub use stream_state::State;
