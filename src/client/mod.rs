//! Subscriber client
//!
//! Library side of a subscriber: keeps a channel to the relay open,
//! reconnecting after a fixed delay, and splits inbound traffic into
//! ordinary messages and reset acknowledgements.
//!
//! ```rust,ignore
//! use msg_relay::client::{ClientConfig, SubscriberClient, SubscriberEvents};
//! use msg_relay::protocol::Message;
//!
//! struct Printer;
//!
//! impl SubscriberEvents for Printer {
//!     fn on_message(&self, message: Message) {
//!         println!("{}", message.text);
//!     }
//!
//!     fn on_reset_ack(&self) {
//!         println!("reset");
//!     }
//! }
//!
//! let client = SubscriberClient::connect_ws(ClientConfig::default(), Arc::new(Printer));
//! client.send_reset();
//! ```

mod manager;
mod transport;

pub use manager::{ClientConfig, ConnectionState, SubscriberClient, SubscriberEvents};
pub use transport::{
    Channel, ChannelReader, ChannelWriter, Connector, WsConnector, DEFAULT_CONNECT_TIMEOUT,
};
