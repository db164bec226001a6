//! SSP/eSSP coin-hopper driver: byte-stuffed CRC16 framing, the AES-ECB
//! encrypted envelope, and the Diffie-Hellman handshake (§4.5).

pub mod constants;
pub mod crypto;
pub mod driver;
pub mod frame;

pub use constants::ReplyResult;
pub use driver::{CoinHopper, HopperLevel, PayoutOutcome};
