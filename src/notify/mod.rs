//! Getting notifications onto client sockets.
//!
//! The notification worker owns the [`NotificationRegistry`] and serves both
//! the websocket endpoint and the bridge endpoint. Other processes reach the
//! registry through a [`MessageSender`].

pub mod registry;
pub mod sender;
pub mod server;

pub use registry::{BroadcastReport, ClientConnection, NotificationRegistry, SocketHandle};
pub use sender::{HttpMessageSender, MessageSender, SendError};
pub use server::router;
