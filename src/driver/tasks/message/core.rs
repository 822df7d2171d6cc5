#![allow(missing_docs)]

use crate::{driver::connection::error::Error, ConnectionInfo};
use flume::Sender;
use std::sync::Arc;

#[derive(Debug)]
pub enum CoreMessage {
    ConnectWithResult(ConnectionInfo, Sender<Result<(), Arc<Error>>>),
    /// Reconnect from scratch using the last-used connection info.
    Rejoin(Sender<Result<(), Arc<Error>>>),
    Disconnect,
    /// The gateway socket of attempt `idx` failed, with an optional close code.
    SignalWsClosure(usize, Option<u16>),
    /// The UDP socket of attempt `idx` failed without being closed by us.
    UdpClosed(usize),
    Poison,
}
