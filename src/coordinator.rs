//! `PaymentCoordinator`: precondition checks, accumulation, completion, and
//! bills-first change planning (§4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::cctalk::CoinAcceptor;
use crate::ccnet::BillAcceptor;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus};
use crate::hardware::{HardwareComponent, HardwareState, HardwareStatus, HardwareStatusDetails};
use crate::lcdm::BillDispenser;
use crate::repository::{keys, Repository};
use crate::response::DispenseReport;
use crate::ssp::CoinHopper;

/// Transaction phase, per §3's `PaymentContext` invariants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Accepting,
    Completing,
    Dispensing,
    Completed,
    Cancelled,
    Failed,
}

/// Mutable transaction state, touched only while `PaymentCoordinator`'s
/// mutex is held.
#[derive(Clone, Debug)]
pub struct PaymentContext {
    pub target: u64,
    pub collected: u64,
    pub phase: Phase,
    pub active_devices: Vec<HardwareComponent>,
    pub errors: Vec<String>,
}

impl PaymentContext {
    fn idle() -> Self {
        Self {
            target: 0,
            collected: 0,
            phase: Phase::Idle,
            active_devices: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// `change = max(0, collected - target)` (§3 invariant).
    pub fn change_due(&self) -> u64 {
        self.collected.saturating_sub(self.target)
    }
}

/// Orchestrates a single payment transaction across the four drivers. Owns
/// no serial link directly; every device call goes through the driver
/// handles it was constructed with.
pub struct PaymentCoordinator {
    repository: Arc<dyn Repository>,
    bus: Arc<EventBus>,
    bill_acceptor: Arc<BillAcceptor>,
    bill_dispenser: Arc<BillDispenser>,
    coin_acceptor: Arc<CoinAcceptor>,
    coin_hopper: Arc<CoinHopper>,
    context: Mutex<PaymentContext>,
    accumulator_running: Arc<AtomicBool>,
}

impl PaymentCoordinator {
    pub fn new(
        repository: Arc<dyn Repository>,
        bus: Arc<EventBus>,
        bill_acceptor: Arc<BillAcceptor>,
        bill_dispenser: Arc<BillDispenser>,
        coin_acceptor: Arc<CoinAcceptor>,
        coin_hopper: Arc<CoinHopper>,
    ) -> Self {
        Self {
            repository,
            bus,
            bill_acceptor,
            bill_dispenser,
            coin_acceptor,
            coin_hopper,
            context: Mutex::new(PaymentContext::idle()),
            accumulator_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Devices this deployment expects, from `available_devices_cash`.
    /// Absent or unparseable defaults to all four (§6).
    fn expected_devices(&self) -> Vec<HardwareComponent> {
        match self.repository.get_string(keys::AVAILABLE_DEVICES_CASH).ok().flatten() {
            Some(raw) if !raw.trim().is_empty() => {
                let wanted: Vec<HardwareComponent> = raw
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .filter_map(|name| HardwareComponent::all().into_iter().find(|c| c.to_string().eq_ignore_ascii_case(name)))
                    .collect();
                if wanted.is_empty() {
                    HardwareComponent::all().to_vec()
                } else {
                    wanted
                }
            }
            _ => HardwareComponent::all().to_vec(),
        }
    }

    /// Attempts to initialise every device named in `available_devices_cash`
    /// (all four if unset); returns success only when every expected device
    /// connects (§4.6).
    pub fn init_devices(&self) -> Result<()> {
        let expected = self.expected_devices();
        let mut connected = Vec::new();
        let mut failures = Vec::new();

        if expected.contains(&HardwareComponent::BillAcceptor) {
            match self.bill_acceptor.connect() {
                Ok(()) => connected.push(HardwareComponent::BillAcceptor),
                Err(e) => failures.push(format!("{}: {e}", HardwareComponent::BillAcceptor)),
            }
        }
        if expected.contains(&HardwareComponent::CoinAcceptor) {
            match self.coin_acceptor.connect() {
                Ok(_) => connected.push(HardwareComponent::CoinAcceptor),
                Err(e) => failures.push(format!("{}: {e}", HardwareComponent::CoinAcceptor)),
            }
        }
        if expected.contains(&HardwareComponent::CoinHopper) {
            match self.coin_hopper.connect() {
                Ok(()) => connected.push(HardwareComponent::CoinHopper),
                Err(e) => failures.push(format!("{}: {e}", HardwareComponent::CoinHopper)),
            }
        }
        // LCDM has no connect handshake beyond STATUS; probe readiness instead.
        if expected.contains(&HardwareComponent::BillDispenser) {
            match self.bill_dispenser.test_status() {
                Ok(_) => connected.push(HardwareComponent::BillDispenser),
                Err(e) => failures.push(format!("{}: {e}", HardwareComponent::BillDispenser)),
            }
        }

        let mut ctx = self.context.lock().unwrap();
        ctx.active_devices = connected;

        if failures.is_empty() {
            Ok(())
        } else {
            ctx.errors.extend(failures.clone());
            Err(Error::device_fault(failures.join("; ")))
        }
    }

    fn is_test_mode(&self) -> bool {
        self.repository.is_truthy(keys::IS_TEST_MODE).unwrap_or(false)
    }

    /// Validates preconditions (skipped in test mode), enables both
    /// acceptors, and starts accumulating toward `amount_kopecks`.
    pub fn start_payment(self: &Arc<Self>, amount_kopecks: u64) -> Result<()> {
        if !self.is_test_mode() {
            self.check_start_preconditions()?;
        }

        {
            let mut ctx = self.context.lock().unwrap();
            if ctx.phase == Phase::Accepting {
                return Err(Error::precondition("a payment is already in progress"));
            }
            *ctx = PaymentContext {
                target: amount_kopecks,
                collected: 0,
                phase: Phase::Accepting,
                active_devices: ctx.active_devices.clone(),
                errors: Vec::new(),
            };
        }

        self.repository.set_u64(keys::TARGET_AMOUNT, amount_kopecks)?;
        self.repository.set_u64(keys::COLLECTED_AMOUNT, 0)?;

        self.bill_acceptor.enable()?;
        self.coin_acceptor.enable()?;
        self.start_accumulator();
        Ok(())
    }

    fn check_start_preconditions(&self) -> Result<()> {
        {
            let ctx = self.context.lock().unwrap();
            if ctx.phase == Phase::Accepting {
                return Err(Error::precondition("a payment is already in progress"));
            }
        }

        let upper_count = self.repository.get_u32_or(keys::BILL_DISPENSER_UPPER_COUNT, 0)?;
        let lower_count = self.repository.get_u32_or(keys::BILL_DISPENSER_LOWER_COUNT, 0)?;
        if upper_count < 50 || lower_count < 50 {
            return Err(Error::precondition("dispenser cassette counts below minimum of 50"));
        }

        let bill_count = self.repository.get_u32_or(keys::BILL_COUNT, 0)?;
        let max_bill_count = self.repository.get_u32_or(keys::MAX_BILL_COUNT, u32::MAX)?;
        if bill_count >= max_bill_count {
            return Err(Error::precondition("bill acceptor is at capacity"));
        }

        Ok(())
    }

    fn start_accumulator(self: &Arc<Self>) {
        if self.accumulator_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let coordinator = Arc::clone(self);
        let rx = self.bus.subscribe();
        thread::spawn(move || {
            while coordinator.accumulator_running.load(Ordering::SeqCst) {
                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(Event::BillAccepted { amount_kopecks }) | Ok(Event::CoinCredit { amount_kopecks }) => {
                        coordinator.on_credit(amount_kopecks);
                    }
                    Ok(_) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });
    }

    fn on_credit(self: &Arc<Self>, amount_kopecks: u64) {
        let should_complete = {
            let mut ctx = self.context.lock().unwrap();
            if ctx.phase != Phase::Accepting {
                return;
            }
            ctx.collected += amount_kopecks;
            let _ = self.repository.set_u64(keys::COLLECTED_AMOUNT, ctx.collected);
            if ctx.collected >= ctx.target {
                ctx.phase = Phase::Completing;
                true
            } else {
                false
            }
        };

        if should_complete {
            self.complete_payment();
        }
    }

    /// Disables both acceptors, resets repository counters, and issues
    /// change, if any (§4.6 "Completion").
    fn complete_payment(self: &Arc<Self>) {
        self.accumulator_running.store(false, Ordering::SeqCst);
        let _ = self.bill_acceptor.disable();
        let _ = self.coin_acceptor.disable();

        let (collected, target) = {
            let ctx = self.context.lock().unwrap();
            (ctx.collected, ctx.target)
        };

        let _ = self.repository.set_u64(keys::COLLECTED_AMOUNT, 0);

        info!("payment completed: collected={collected}, target={target}");

        let change = collected.saturating_sub(target);
        if change > 0 {
            let _ = self.dispense_change(change);
        }

        let mut ctx = self.context.lock().unwrap();
        ctx.phase = Phase::Completed;
    }

    /// Cancels the transaction: disables acceptors, drains queued events,
    /// and resets the context. Bills already accepted are not rolled back
    /// (§4.6).
    pub fn stop_payment(&self) -> Result<u64> {
        self.accumulator_running.store(false, Ordering::SeqCst);
        self.bill_acceptor.disable()?;
        self.coin_acceptor.disable()?;

        let mut ctx = self.context.lock().unwrap();
        let collected = ctx.collected;
        ctx.phase = Phase::Cancelled;
        *ctx = PaymentContext::idle();
        Ok(collected)
    }

    /// Best-effort payout: bills first per the greedy split in §4.6, then
    /// whatever remains in coins.
    pub fn dispense_change(&self, amount_kopecks: u64) -> Result<DispenseReport> {
        {
            let mut ctx = self.context.lock().unwrap();
            ctx.phase = Phase::Dispensing;
        }

        let upper_denom = self.repository.get_u32_or(keys::BILL_DISPENSER_UPPER_LVL, 0)? as u64 * 100;
        let lower_denom = self.repository.get_u32_or(keys::BILL_DISPENSER_LOWER_LVL, 0)? as u64 * 100;
        let upper_count = self.repository.get_u32_or(keys::BILL_DISPENSER_UPPER_COUNT, 0)?;
        let lower_count = self.repository.get_u32_or(keys::BILL_DISPENSER_LOWER_COUNT, 0)?;

        let (high_denom, high_count, low_denom, low_count, high_is_upper) = if upper_denom >= lower_denom {
            (upper_denom, upper_count, lower_denom, lower_count, true)
        } else {
            (lower_denom, lower_count, upper_denom, upper_count, false)
        };

        let mut dispensed = 0u64;
        let mut remaining = amount_kopecks;

        if high_denom > 0 && high_count > 0 {
            let n_high = ((remaining / high_denom) as u32).min(high_count);
            let r = remaining - n_high as u64 * high_denom;
            let n_low = if low_denom > 0 {
                ((r / low_denom) as u32).min(low_count)
            } else {
                0
            };

            let (upper_request, lower_request) = if high_is_upper {
                (n_high, n_low)
            } else {
                (n_low, n_high)
            };

            if upper_request > 0 || lower_request > 0 {
                match self.bill_dispenser.dispense_dual(upper_request, lower_request) {
                    Ok(outcome) => {
                        dispensed += outcome.upper_exit as u64 * upper_denom + outcome.lower_exit as u64 * lower_denom;
                        let _ = self
                            .repository
                            .set_u32(keys::BILL_DISPENSER_UPPER_COUNT, upper_count - outcome.upper_exit);
                        let _ = self
                            .repository
                            .set_u32(keys::BILL_DISPENSER_LOWER_COUNT, lower_count - outcome.lower_exit);
                    }
                    Err(e) if e.code() == crate::error::ErrorCode::DeviceFault => return Err(e),
                    Err(e) => warn!("bill dispense attempt failed: {e}"),
                }
            }
        }

        remaining = amount_kopecks.saturating_sub(dispensed);

        if remaining > 0 {
            let coin_dispensed = self.dispense_coins(remaining)?;
            dispensed += coin_dispensed;
            remaining = amount_kopecks.saturating_sub(dispensed);
        }

        if remaining > 0 {
            self.bus.publish(Event::IncompletePayout {
                requested_kopecks: amount_kopecks,
                dispensed_kopecks: dispensed,
            });
        } else {
            self.bus.publish(Event::Dispensed {
                amount_kopecks: dispensed,
            });
        }

        // Restore to Idle; a caller driving this through `complete_payment`
        // overwrites this with `Completed` right after this call returns.
        {
            let mut ctx = self.context.lock().unwrap();
            ctx.phase = Phase::Idle;
        }

        Ok(DispenseReport::new(amount_kopecks, dispensed))
    }

    fn dispense_coins(&self, remaining_kopecks: u64) -> Result<u64> {
        let big_coin_priority = self.repository.is_truthy(keys::BIG_COIN_PRIORITY).unwrap_or(false);

        if !big_coin_priority {
            let outcome = self
                .coin_hopper
                .payout_amount(remaining_kopecks as u32, *b"RUB")?;
            return Ok(outcome.dispensed_kopecks);
        }

        let mut levels = self.coin_hopper.get_all_levels()?;
        levels.sort_by(|a, b| b.denomination_kopecks.cmp(&a.denomination_kopecks));

        let mut remaining = remaining_kopecks;
        let mut items = Vec::new();
        for level in levels {
            if remaining == 0 {
                break;
            }
            let denom = level.denomination_kopecks as u64;
            if denom == 0 {
                continue;
            }
            let take = ((remaining / denom) as u16).min(level.count);
            if take > 0 {
                items.push((take, level.denomination_kopecks, level.country));
                remaining -= take as u64 * denom;
            }
        }

        if items.is_empty() {
            return Ok(0);
        }

        let outcome = self.coin_hopper.payout_by_denomination(&items)?;
        Ok(outcome.dispensed_kopecks)
    }

    pub fn context_snapshot(&self) -> PaymentContext {
        self.context.lock().unwrap().clone()
    }

    pub fn bill_acceptor_set_max_bill_count(&self, value: u32) -> Result<()> {
        self.repository.set_u32(keys::MAX_BILL_COUNT, value)
    }

    pub fn bill_acceptor_reset_bill_count(&self) -> Result<()> {
        self.repository.set_u32(keys::BILL_COUNT, 0)
    }

    pub fn bill_acceptor_status(&self) -> Result<HardwareStatus> {
        let bill_count = self.repository.get_u32_or(keys::BILL_COUNT, 0)?;
        let max_bill_count = self.repository.get_u32_or(keys::MAX_BILL_COUNT, 0)?;
        let firmware = self.repository.get_string(keys::BILL_ACCEPTOR_FIRMWARE)?;

        let connected = self.context.lock().unwrap().active_devices.contains(&HardwareComponent::BillAcceptor);
        let state = if connected { HardwareState::OK } else { HardwareState::Missing };

        let mut details = HardwareStatusDetails::default()
            .with_bill_count(bill_count)
            .with_max_bill_count(max_bill_count);
        if let Some(firmware) = firmware {
            details = details.with_firmware_version(firmware);
        }

        Ok(HardwareStatus::new(
            HardwareComponent::BillAcceptor,
            state,
            if connected { "connected" } else { "not connected" },
            details,
        ))
    }

    /// `set_bill_dispenser_lvl` replaces the stored per-box denominations
    /// outright; `set_bill_dispenser_count` is additive (§4.6).
    pub fn set_bill_dispenser_lvl(&self, upper_lvl: u32, lower_lvl: u32) -> Result<()> {
        self.repository.set_u32(keys::BILL_DISPENSER_UPPER_LVL, upper_lvl)?;
        self.repository.set_u32(keys::BILL_DISPENSER_LOWER_LVL, lower_lvl)
    }

    pub fn set_bill_dispenser_count(&self, upper_count: u32, lower_count: u32) -> Result<()> {
        let current_upper = self.repository.get_u32_or(keys::BILL_DISPENSER_UPPER_COUNT, 0)?;
        let current_lower = self.repository.get_u32_or(keys::BILL_DISPENSER_LOWER_COUNT, 0)?;
        self.repository
            .set_u32(keys::BILL_DISPENSER_UPPER_COUNT, current_upper + upper_count)?;
        self.repository
            .set_u32(keys::BILL_DISPENSER_LOWER_COUNT, current_lower + lower_count)
    }

    pub fn bill_dispenser_reset_bill_count(&self) -> Result<()> {
        self.repository.set_u32(keys::BILL_DISPENSER_UPPER_COUNT, 0)?;
        self.repository.set_u32(keys::BILL_DISPENSER_LOWER_COUNT, 0)
    }

    pub fn bill_dispenser_status(&self) -> Result<HardwareStatus> {
        let upper_count = self.repository.get_u32_or(keys::BILL_DISPENSER_UPPER_COUNT, 0)?;
        let lower_count = self.repository.get_u32_or(keys::BILL_DISPENSER_LOWER_COUNT, 0)?;
        let connected = self.context.lock().unwrap().active_devices.contains(&HardwareComponent::BillDispenser);

        let (state, description) = match self.bill_dispenser.test_status() {
            Ok(sensors) if sensors.jam_candidate() => (HardwareState::Warning, "jam candidate"),
            Ok(_) => (HardwareState::OK, "connected"),
            Err(_) if connected => (HardwareState::Error, "device fault"),
            Err(_) => (HardwareState::Missing, "not connected"),
        };

        let details = HardwareStatusDetails::default()
            .with_upper_count(upper_count)
            .with_lower_count(lower_count);

        Ok(HardwareStatus::new(HardwareComponent::BillDispenser, state, description, details))
    }

    /// `value` (kopecks) is added to the credited total for `denomination`;
    /// used to reconcile manual cash additions outside a payment context.
    pub fn coin_system_add_coin_count(&self, value: u64, denomination: u32) -> Result<()> {
        info!("manual coin credit recorded: value={value}, denomination={denomination}");
        let current = self.repository.get_u64_or(keys::COLLECTED_AMOUNT, 0)?;
        self.repository.set_u64(keys::COLLECTED_AMOUNT, current + value)
    }

    pub fn coin_system_status(&self) -> Result<HardwareStatus> {
        let active_devices = self.context.lock().unwrap().active_devices.clone();
        let connected = active_devices.contains(&HardwareComponent::CoinAcceptor)
            || active_devices.contains(&HardwareComponent::CoinHopper);
        let state = if connected { HardwareState::OK } else { HardwareState::Missing };
        Ok(HardwareStatus::new(
            HardwareComponent::CoinAcceptor,
            state,
            if connected { "connected" } else { "not connected" },
            HardwareStatusDetails::default(),
        ))
    }

    /// Zeroes the accepted/collected counters after a physical cash
    /// collection, without touching an in-progress transaction's context.
    pub fn coin_system_cash_collection(&self) -> Result<()> {
        self.repository.set_u32(keys::BILL_COUNT, 0)?;
        self.repository.set_u64(keys::COLLECTED_AMOUNT, 0)
    }

    /// Exercises the bill and/or coin payout paths without an active
    /// payment context, for field diagnostics; never touches
    /// `collected_amount`/`target_amount` (§4.6).
    pub fn test_dispense_change(&self, is_bill: bool, is_coin: bool) -> Result<DispenseReport> {
        let mut dispensed = 0u64;
        let mut requested = 0u64;

        if is_bill {
            let upper_denom = self.repository.get_u32_or(keys::BILL_DISPENSER_UPPER_LVL, 0)? as u64 * 100;
            requested += upper_denom;
            if upper_denom > 0 {
                if let Ok(outcome) = self.bill_dispenser.dispense_dual(1, 0) {
                    dispensed += outcome.upper_exit as u64 * upper_denom;
                }
            }
        }

        if is_coin {
            let lowest = self
                .coin_hopper
                .get_all_levels()?
                .into_iter()
                .min_by_key(|level| level.denomination_kopecks);
            if let Some(level) = lowest {
                requested += level.denomination_kopecks as u64;
                let outcome = self
                    .coin_hopper
                    .payout_by_denomination(&[(1, level.denomination_kopecks, level.country)])?;
                dispensed += outcome.dispensed_kopecks;
            }
        }

        Ok(DispenseReport::new(requested, dispensed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_due_is_nonnegative_and_saturating() {
        let ctx = PaymentContext {
            target: 15_000,
            collected: 10_000,
            phase: Phase::Accepting,
            active_devices: Vec::new(),
            errors: Vec::new(),
        };
        assert_eq!(ctx.change_due(), 0);
    }

    #[test]
    fn change_planning_literal_vector_splits_bills_first() {
        // upper=10000 kop, lower=5000 kop, counts (3,3); change_planning(25000)
        let upper_denom = 10_000u64;
        let lower_denom = 5_000u64;
        let (upper_count, lower_count) = (3u32, 3u32);
        let change = 25_000u64;

        let n_high = ((change / upper_denom) as u32).min(upper_count);
        let r = change - n_high as u64 * upper_denom;
        let n_low = ((r / lower_denom) as u32).min(lower_count);

        assert_eq!((n_high, n_low), (2, 1));
    }
}
