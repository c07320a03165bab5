//! Jobwire
//!
//! A real-time job-status channel: a persistent WebSocket connection to a
//! job processor that submits job commands, receives status frames, and
//! recovers from network interruptions with bounded linear backoff.
//!
//! # Example
//!
//! ```no_run
//! use jobwire::{ChannelConfig, JobChannel, JobCommand};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = JobChannel::new(ChannelConfig::new("https://api.example.com"));
//!
//!     channel.on_connection_change(|connected| {
//!         println!("connected: {}", connected);
//!     });
//!     channel.on_message(|frame| {
//!         println!("{:?} for {:?}", frame.status, frame.job_id);
//!     });
//!
//!     channel.connect().await?;
//!
//!     let job = JobCommand::new_job("job-42", "https://cdn.example.com/upload.mp4")
//!         .with_file("upload.mp4", 73_400_320);
//!     channel.send_job(&job)?;
//!
//!     channel.disconnect();
//!     Ok(())
//! }
//! ```

mod client;
pub mod config;
mod connection;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod transport;

pub use client::JobChannel;
pub use config::{derive_endpoint, ChannelConfig, DEFAULT_JOBS_PATH};
pub use connection::ConnectionState;
pub use dispatch::{ConnectionHandler, MessageHandler, Subscription};
pub use error::{ChannelError, Result};
pub use messages::{
    decode, encode, FrameStatus, JobCommand, JobCommandKind, QueueSummary, ServerFrame,
};
pub use transport::{
    Connector, Transport, TransportEvent, WsConnector, ABNORMAL_CLOSE_CODE, CLEAN_CLOSE_CODE,
    NO_STATUS_CLOSE_CODE,
};
