pub mod asn1;
pub mod config;
pub mod controls;
pub mod filter;
pub mod message;
pub mod ops;
pub mod script;
pub mod server;
pub mod session;
pub mod tls;

pub use asn1::{BerError, Element};
pub use config::Config;
pub use message::LdapMessage;
pub use ops::ProtocolOp;
pub use server::ProxyServer;
