//! ccTalk coin-acceptor driver: sum-to-zero checksum framing and the
//! rolling event-counter discipline (§4.4).

pub mod constants;
pub mod driver;
pub mod frame;

pub use driver::CoinAcceptor;
