//! Streaming connection management

mod client;
mod manager;

pub use client::{WebSocketClient, WsWriter};
pub use manager::{
    ErrorFlag, FeedHandler, ReconnectingStream, StreamHandle, StreamSettings, StreamStats,
};
