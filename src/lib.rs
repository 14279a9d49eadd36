//! Client for the MPD line protocol: one socket, a strict FIFO command
//! queue, lifecycle supervision with reconnect, a background status poll,
//! and the chunked binary album-art sub-protocol.

pub mod events;
pub mod logging;
pub mod mpd;
pub mod store;
pub mod util;
