//! Capability traits replacing the duck-typed drivers of the source (§9):
//! each hardware driver implements the subset of `AcceptorControl`,
//! `DispenserControl`, and `StatusProbe` it actually supports.

use crate::error::Result;
use crate::hardware::HardwareStatus;

/// A device that can be toggled between accepting and not accepting input.
pub trait AcceptorControl {
    fn enable(&self) -> Result<()>;
    fn disable(&self) -> Result<()>;
}

/// A device that pays out a requested amount, best-effort.
pub trait DispenserControl {
    fn dispense(&self, amount_kopecks: u64) -> Result<u64>;
}

/// A device that can report its own health snapshot.
pub trait StatusProbe {
    fn status(&self) -> Result<HardwareStatus>;
}

use std::sync::Arc;

use crate::ccnet::BillAcceptor;
use crate::cctalk::CoinAcceptor;

impl AcceptorControl for Arc<BillAcceptor> {
    fn enable(&self) -> Result<()> {
        BillAcceptor::enable(self)
    }

    fn disable(&self) -> Result<()> {
        BillAcceptor::disable(self.as_ref())
    }
}

impl AcceptorControl for Arc<CoinAcceptor> {
    fn enable(&self) -> Result<()> {
        CoinAcceptor::enable(self)
    }

    fn disable(&self) -> Result<()> {
        CoinAcceptor::disable(self.as_ref())
    }
}
