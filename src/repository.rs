//! The shared key-value store is an external collaborator (§6); the core
//! only consumes it through this trait. A real deployment backs it with
//! whatever durable store the platform already runs; tests back it with
//! [`MemoryRepository`].

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Repository keys read and written by the core, per §6.
pub mod keys {
    pub const BILL_COUNT: &str = "bill_count";
    pub const MAX_BILL_COUNT: &str = "max_bill_count";
    pub const BILL_ACCEPTOR_FIRMWARE: &str = "bill_acceptor_firmware";
    pub const BILL_DISPENSER_UPPER_LVL: &str = "bill_dispenser:upper_lvl";
    pub const BILL_DISPENSER_LOWER_LVL: &str = "bill_dispenser:lower_lvl";
    pub const BILL_DISPENSER_UPPER_COUNT: &str = "bill_dispenser:upper_count";
    pub const BILL_DISPENSER_LOWER_COUNT: &str = "bill_dispenser:lower_count";
    pub const TARGET_AMOUNT: &str = "target_amount";
    pub const COLLECTED_AMOUNT: &str = "collected_amount";
    pub const IS_TEST_MODE: &str = "cash_system_is_test_mode";
    pub const AVAILABLE_DEVICES_CASH: &str = "available_devices_cash";
    pub const BIG_COIN_PRIORITY: &str = "settings:big_coin_priority";
}

/// Facade over the external key-value store. Assumed atomic per key; the
/// core never requires a cross-key transaction.
pub trait Repository: Send + Sync {
    fn get_u32(&self, key: &str) -> Result<Option<u32>>;
    fn get_u64(&self, key: &str) -> Result<Option<u64>>;
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    fn set_u32(&self, key: &str, value: u32) -> Result<()>;
    fn set_u64(&self, key: &str, value: u64) -> Result<()>;
    fn set_string(&self, key: &str, value: &str) -> Result<()>;

    fn get_u32_or(&self, key: &str, default: u32) -> Result<u32> {
        Ok(self.get_u32(key)?.unwrap_or(default))
    }

    fn get_u64_or(&self, key: &str, default: u64) -> Result<u64> {
        Ok(self.get_u64(key)?.unwrap_or(default))
    }

    fn is_truthy(&self, key: &str) -> Result<bool> {
        Ok(match self.get_string(key)? {
            Some(s) => matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => false,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Value {
    U32(u32),
    U64(u64),
    Str(String),
}

/// An in-memory [`Repository`] backed by a mutex-guarded map, for tests and
/// field diagnostics.
#[derive(Default)]
pub struct MemoryRepository {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        let values = self.values.lock().map_err(|e| Error::repository_unavailable(e.to_string()))?;
        Ok(match values.get(key) {
            Some(Value::U32(v)) => Some(*v),
            _ => None,
        })
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        let values = self.values.lock().map_err(|e| Error::repository_unavailable(e.to_string()))?;
        Ok(match values.get(key) {
            Some(Value::U64(v)) => Some(*v),
            _ => None,
        })
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|e| Error::repository_unavailable(e.to_string()))?;
        Ok(match values.get(key) {
            Some(Value::Str(v)) => Some(v.clone()),
            _ => None,
        })
    }

    fn set_u32(&self, key: &str, value: u32) -> Result<()> {
        let mut values = self.values.lock().map_err(|e| Error::repository_unavailable(e.to_string()))?;
        values.insert(key.to_string(), Value::U32(value));
        Ok(())
    }

    fn set_u64(&self, key: &str, value: u64) -> Result<()> {
        let mut values = self.values.lock().map_err(|e| Error::repository_unavailable(e.to_string()))?;
        values.insert(key.to_string(), Value::U64(value));
        Ok(())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|e| Error::repository_unavailable(e.to_string()))?;
        values.insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_repository_round_trips_values() {
        let repo = MemoryRepository::new();
        repo.set_u64(keys::TARGET_AMOUNT, 15_000).unwrap();
        assert_eq!(repo.get_u64(keys::TARGET_AMOUNT).unwrap(), Some(15_000));
        assert_eq!(repo.get_u64_or(keys::COLLECTED_AMOUNT, 0).unwrap(), 0);
    }

    #[test]
    fn is_truthy_accepts_common_spellings() {
        let repo = MemoryRepository::new();
        repo.set_string(keys::IS_TEST_MODE, "true").unwrap();
        assert!(repo.is_truthy(keys::IS_TEST_MODE).unwrap());
        repo.set_string(keys::BIG_COIN_PRIORITY, "0").unwrap();
        assert!(!repo.is_truthy(keys::BIG_COIN_PRIORITY).unwrap());
    }
}
