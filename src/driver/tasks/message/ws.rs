#![allow(missing_docs)]

use crate::ws::WsStream;

pub enum WsMessage {
    Ws(Box<WsStream>),
    SetKeepalive(f64),
    Speaking(bool),
}

impl std::fmt::Debug for WsMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsMessage::Ws(_) => f.write_str("Ws(..)"),
            WsMessage::SetKeepalive(k) => f.debug_tuple("SetKeepalive").field(k).finish(),
            WsMessage::Speaking(s) => f.debug_tuple("Speaking").field(s).finish(),
        }
    }
}
