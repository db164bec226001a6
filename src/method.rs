use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;

/// Command-channel methods the core accepts as its upstream API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    InitDevices,
    StartAcceptingPayment,
    StopAcceptingPayment,
    DispenseChange,
    TestDispenseChange,
    BillAcceptorSetMaxBillCount,
    BillAcceptorResetBillCount,
    BillAcceptorStatus,
    SetBillDispenserLvl,
    SetBillDispenserCount,
    BillDispenserStatus,
    BillDispenserResetBillCount,
    CoinSystemAddCoinCount,
    CoinSystemStatus,
    CoinSystemCashCollection,
    /// Unrecognized method name.
    Unknown = 0xff,
}

impl Default for Method {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Serialize for Method {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s: &'static str = self.into();
        serializer.serialize_str(s)
    }
}

impl From<Method> for &'static str {
    fn from(m: Method) -> Self {
        match m {
            Method::InitDevices => "init_devices",
            Method::StartAcceptingPayment => "start_accepting_payment",
            Method::StopAcceptingPayment => "stop_accepting_payment",
            Method::DispenseChange => "dispense_change",
            Method::TestDispenseChange => "test_dispense_change",
            Method::BillAcceptorSetMaxBillCount => "bill_acceptor_set_max_bill_count",
            Method::BillAcceptorResetBillCount => "bill_acceptor_reset_bill_count",
            Method::BillAcceptorStatus => "bill_acceptor_status",
            Method::SetBillDispenserLvl => "set_bill_dispenser_lvl",
            Method::SetBillDispenserCount => "set_bill_dispenser_count",
            Method::BillDispenserStatus => "bill_dispenser_status",
            Method::BillDispenserResetBillCount => "bill_dispenser_reset_bill_count",
            Method::CoinSystemAddCoinCount => "coin_system_add_coin_count",
            Method::CoinSystemStatus => "coin_system_status",
            Method::CoinSystemCashCollection => "coin_system_cash_collection",
            Method::Unknown => "unknown",
        }
    }
}

impl From<&Method> for &'static str {
    fn from(m: &Method) -> Self {
        (*m).into()
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "init_devices" => Self::InitDevices,
            "start_accepting_payment" => Self::StartAcceptingPayment,
            "stop_accepting_payment" => Self::StopAcceptingPayment,
            "dispense_change" => Self::DispenseChange,
            "test_dispense_change" => Self::TestDispenseChange,
            "bill_acceptor_set_max_bill_count" => Self::BillAcceptorSetMaxBillCount,
            "bill_acceptor_reset_bill_count" => Self::BillAcceptorResetBillCount,
            "bill_acceptor_status" => Self::BillAcceptorStatus,
            "set_bill_dispenser_lvl" => Self::SetBillDispenserLvl,
            "set_bill_dispenser_count" => Self::SetBillDispenserCount,
            "bill_dispenser_status" => Self::BillDispenserStatus,
            "bill_dispenser_reset_bill_count" => Self::BillDispenserResetBillCount,
            "coin_system_add_coin_count" => Self::CoinSystemAddCoinCount,
            "coin_system_status" => Self::CoinSystemStatus,
            "coin_system_cash_collection" => Self::CoinSystemCashCollection,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_serde_round_trips() {
        for m in [
            Method::InitDevices,
            Method::StartAcceptingPayment,
            Method::DispenseChange,
            Method::CoinSystemCashCollection,
        ] {
            let json = serde_json::to_string(&m).unwrap();
            let parsed: Method = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, m);
        }
    }

    #[test]
    fn method_from_str_is_case_insensitive() {
        assert_eq!(Method::from("START_ACCEPTING_PAYMENT"), Method::StartAcceptingPayment);
        assert_eq!(Method::from("Start_Accepting_Payment"), Method::StartAcceptingPayment);
        assert_eq!(Method::from("start_accepting_payment"), Method::StartAcceptingPayment);
    }

    #[test]
    fn unrecognized_method_falls_back_to_unknown() {
        assert_eq!(Method::from("not_a_real_method"), Method::Unknown);
    }
}
