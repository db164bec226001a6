//! A `Config` value constructed once at process startup and passed
//! explicitly from the entrypoint to the coordinator — no mutable
//! singletons, per §9's re-architecture advice.

use std::time::Duration;

/// Per-port serial settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialPortConfig {
    pub path: String,
    pub baud_rate: u32,
}

impl SerialPortConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

/// SSP/eSSP-specific tuning, per §4.5.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SspConfig {
    pub command_retries: u32,
    pub command_timeout: Duration,
    pub poll_interval: Duration,
    /// How long a payout command waits for the poll loop to report the
    /// correlated `Dispensed`/`IncompletePayout` outcome before giving up.
    pub payout_timeout: Duration,
    /// Preshared 8-byte key material, hex-encoded (default `0123456701234567`).
    pub fixed_key_hex: String,
}

impl Default for SspConfig {
    fn default() -> Self {
        Self {
            command_retries: 20,
            command_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(300),
            payout_timeout: Duration::from_secs(10),
            fixed_key_hex: "0123456701234567".to_string(),
        }
    }
}

/// Process-wide configuration. Denominations, counts, and capacities are
/// deliberately absent here: they live in the repository and are always
/// read fresh at the point of use (§9).
#[derive(Clone, Debug)]
pub struct Config {
    pub bill_acceptor_port: SerialPortConfig,
    pub bill_dispenser_port: SerialPortConfig,
    pub coin_acceptor_port: SerialPortConfig,
    pub coin_hopper_port: SerialPortConfig,

    pub ccnet_poll_interval: Duration,
    pub ccnet_stacked_poll_interval: Duration,
    pub ccnet_error_backoff: Duration,
    pub ccnet_command_timeout: Duration,
    pub ccnet_auto_stack: bool,

    pub lcdm_exchange_timeout: Duration,

    pub cctalk_poll_interval: Duration,
    pub cctalk_error_backoff: Duration,
    pub cctalk_reply_timeout: Duration,

    pub ssp: SspConfig,

    pub test_mode: bool,
}

impl Config {
    pub fn new(
        bill_acceptor_port: SerialPortConfig,
        bill_dispenser_port: SerialPortConfig,
        coin_acceptor_port: SerialPortConfig,
        coin_hopper_port: SerialPortConfig,
    ) -> Self {
        Self {
            bill_acceptor_port,
            bill_dispenser_port,
            coin_acceptor_port,
            coin_hopper_port,
            ccnet_poll_interval: Duration::from_millis(200),
            ccnet_stacked_poll_interval: Duration::from_millis(10),
            ccnet_error_backoff: Duration::from_secs(1),
            ccnet_command_timeout: Duration::from_secs(1),
            ccnet_auto_stack: true,
            lcdm_exchange_timeout: Duration::from_secs(2),
            cctalk_poll_interval: Duration::from_millis(200),
            cctalk_error_backoff: Duration::from_secs(1),
            cctalk_reply_timeout: Duration::from_millis(300),
            ssp: SspConfig::default(),
            test_mode: false,
        }
    }
}
