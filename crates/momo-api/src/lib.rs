// momo-api: STOMP-over-WebSocket connector and REST client for the Momo backend

pub mod error;
pub mod models;
pub mod rest;
pub mod stomp;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use models::RecordId;
pub use rest::{RestClient, UserRole};
pub use stomp::{Command, Frame};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{Link, LinkEvent, LinkPeer, StompConfig, StompConnector};
