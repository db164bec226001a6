use serde::{Deserialize, Serialize};

use std::fmt;

use crate::{error::JsonRpcError, hardware::HardwareStatus, method::Method};

pub const OPEN_BRACE: &str = "{";
pub const CLOSE_BRACE: &str = "}";

/// Outcome of a bills-then-coins dispense, per §4.6 change planning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispenseReport {
    pub requested: u64,
    pub dispensed: u64,
}

impl DispenseReport {
    pub const fn new(requested: u64, dispensed: u64) -> Self {
        Self {
            requested,
            dispensed,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.requested.saturating_sub(self.dispensed)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

impl fmt::Display for DispenseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{OPEN_BRACE}\"requested\":{},\"dispensed\":{},\"remaining\":{}{CLOSE_BRACE}",
            self.requested,
            self.dispensed,
            self.remaining()
        )
    }
}

/// Data payload carried on the `data` field of a [`CommandResponse`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CommandPayload {
    Empty(()),
    HardwareStatus(HardwareStatus),
    Collected { collected_amount: u64 },
    DispenseReport(DispenseReport),
}

impl Default for CommandPayload {
    fn default() -> Self {
        Self::Empty(())
    }
}

impl fmt::Display for CommandPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty(()) => write!(f, "null"),
            Self::HardwareStatus(inner) => write!(f, "{inner}"),
            Self::Collected { collected_amount } => {
                write!(f, "{OPEN_BRACE}\"collected_amount\":{collected_amount}{CLOSE_BRACE}")
            }
            Self::DispenseReport(inner) => write!(f, "{inner}"),
        }
    }
}

/// Response shape for every command-channel operation: `{command_id, success, message, data?}`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommandResponse {
    command_id: u64,
    method: Method,
    success: bool,
    message: String,
    data: Option<CommandPayload>,
}

impl CommandResponse {
    pub fn ok(command_id: u64, method: Method, data: CommandPayload) -> Self {
        Self {
            command_id,
            method,
            success: true,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn ok_empty(command_id: u64, method: Method) -> Self {
        Self::ok(command_id, method, CommandPayload::Empty(()))
    }

    pub fn failure(command_id: u64, method: Method, err: JsonRpcError) -> Self {
        Self {
            command_id,
            method,
            success: false,
            message: format!("{err}"),
            data: None,
        }
    }

    pub fn command_id(&self) -> u64 {
        self.command_id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&CommandPayload> {
        self.data.as_ref()
    }
}

impl fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{OPEN_BRACE}\"command_id\":{},\"method\":\"{}\",\"success\":{},\"message\":\"{}\"",
            self.command_id, self.method, self.success, self.message
        )?;
        if let Some(data) = self.data.as_ref() {
            write!(f, ",\"data\":{data}")?;
        }
        write!(f, "{CLOSE_BRACE}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_serializes_with_data() {
        let resp = CommandResponse::ok(
            1,
            Method::DispenseChange,
            CommandPayload::DispenseReport(DispenseReport::new(25_000, 25_000)),
        );
        let rendered = format!("{resp}");
        assert!(rendered.contains("\"success\":true"));
        assert!(rendered.contains("\"dispensed\":25000"));
    }

    #[test]
    fn failure_response_carries_message_and_no_data() {
        let resp = CommandResponse::failure(
            2,
            Method::StartAcceptingPayment,
            JsonRpcError::failure("payment already in progress"),
        );
        assert!(!resp.success());
        assert!(resp.data().is_none());
        assert!(resp.message().contains("payment already in progress"));
    }

    #[test]
    fn dispense_report_tracks_remaining() {
        let report = DispenseReport::new(1000, 700);
        assert_eq!(report.remaining(), 300);
        assert!(!report.is_complete());
    }
}
