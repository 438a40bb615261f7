//! Wire protocol for the rondo router.
//!
//! Three layers, innermost first:
//!
//! - [`frame`] — length-prefixed frames over an accumulating byte buffer.
//!   Purely functional: no I/O, no state beyond the caller's buffer.
//! - [`message`] — typed `PeerToRouter` / `RouterToPeer` messages,
//!   serialized with bincode for compact binary framing.
//! - [`seal`] — authenticated encryption of frame bodies once the
//!   handshake has established a session key. Tampering surfaces as a
//!   crypto error rather than silent corruption.

pub mod frame;
pub mod message;
pub mod seal;

pub use frame::{decode_frame, encode_frame, FrameError, LEN_PREFIX_BYTES, MAX_FRAME_BYTES};
pub use message::{
    decode_peer_message, decode_relay_attach, decode_router_message, encode_message, ErrorCode,
    HostIdVariant, PeerRole, PeerToRouter, ProtoError, RelayAttach, RouterToPeer, SessionType,
};
pub use seal::{KeyExchange, SealError, SessionCrypto};
