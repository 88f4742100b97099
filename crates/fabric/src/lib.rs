//! seisbus-fabric: the messaging and module-control fabric of a
//! seismic real-time pipeline.
//!
//! Producers publish waveform packets, picks, and text events through
//! the fan-out broker; request/reply services sit behind the
//! load-balanced RPC broker; and the command broker routes operator
//! commands to named modules while keeping them honest with heartbeats.

pub mod auth;
pub mod broadcast;
pub mod codec;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod formats;
pub mod options;
pub mod pubsub;
pub mod replier;
pub mod rpc;
pub mod transport;

pub use auth::{AuthOptions, Authenticator, AuthenticatorService, Grasslands, Keypair};
pub use broadcast::{BroadcastBroker, BroadcastConfig, BroadcastControl, Steer};
pub use codec::{AnyMessage, CodecRegistry, MessageFormat};
pub use command::{CommandBroker, CommandClient, CommandConfig, ModuleIdentity};
pub use config::SeisbusConfig;
pub use envelope::Envelope;
pub use error::FabricError;
pub use formats::{Failure, Text};
pub use options::{SocketOptions, Wait};
pub use pubsub::{Publisher, Subscriber};
pub use replier::{reply_handler, Replier, ReplyHandler};
pub use rpc::{RpcBroker, RpcClient, RpcConfig};
pub use transport::Endpoint;
