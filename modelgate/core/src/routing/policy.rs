//! Power Budget and Policy Engine
//!
//! Per-user accounting of estimated energy and NVIDIA-class usage, with lazy
//! window rollover, battery-aware power caps, and night-hours throttling.
//!
//! # Atomicity
//!
//! The whole check-and-deduct decision, including lazy window resets, runs
//! under one per-user lock, so two concurrent requests can never both observe
//! "just expired" and both reset the window, and the used counters can never
//! exceed the budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Timelike;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::HardwareClass;
use crate::error::PipelineError;

// ============================================================================
// Tiers
// ============================================================================

/// Subscription tier with budget defaults
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    /// 10 Wh/day, 5 NVIDIA/hour, $0
    #[default]
    Free,
    /// 50 Wh/day, 20 NVIDIA/hour, $1
    Basic,
    /// 200 Wh/day, 100 NVIDIA/hour, $10
    Premium,
    /// 1000 Wh/day, 1000 NVIDIA/hour, $100
    Enterprise,
}

impl UserTier {
    /// Daily energy budget in watt-hours
    #[must_use]
    pub fn daily_budget_wh(&self) -> f64 {
        match self {
            Self::Free => 10.0,
            Self::Basic => 50.0,
            Self::Premium => 200.0,
            Self::Enterprise => 1000.0,
        }
    }

    /// Hourly NVIDIA-class request quota
    #[must_use]
    pub fn nvidia_quota_per_hour(&self) -> u32 {
        match self {
            Self::Free => 5,
            Self::Basic => 20,
            Self::Premium => 100,
            Self::Enterprise => 1000,
        }
    }

    /// Daily spend budget in dollars
    #[must_use]
    pub fn daily_budget_usd(&self) -> f64 {
        match self {
            Self::Free => 0.0,
            Self::Basic => 1.0,
            Self::Premium => 10.0,
            Self::Enterprise => 100.0,
        }
    }
}

// ============================================================================
// Power Source
// ============================================================================

/// Current platform power state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    /// Mains power
    Ac,
    /// Battery with a charge percentage
    Battery {
        /// Remaining charge, 0-100
        percent: u8,
    },
}

/// Source of platform power state, injectable for tests
pub trait PowerSource: Send + Sync {
    /// Read the current power state
    fn state(&self) -> PowerState;
}

/// Reads `/sys/class/power_supply` on Linux; reports AC elsewhere
#[derive(Clone, Debug, Default)]
pub struct SysfsPowerSource;

impl PowerSource for SysfsPowerSource {
    fn state(&self) -> PowerState {
        #[cfg(target_os = "linux")]
        {
            let base = std::path::Path::new("/sys/class/power_supply");
            let on_ac = std::fs::read_to_string(base.join("AC/online"))
                .or_else(|_| std::fs::read_to_string(base.join("ACAD/online")))
                .map(|s| s.trim() == "1")
                .unwrap_or(true);

            if on_ac {
                return PowerState::Ac;
            }

            let percent = std::fs::read_to_string(base.join("BAT0/capacity"))
                .or_else(|_| std::fs::read_to_string(base.join("BAT1/capacity")))
                .ok()
                .and_then(|s| s.trim().parse::<u8>().ok())
                .unwrap_or(100);

            PowerState::Battery { percent }
        }
        #[cfg(not(target_os = "linux"))]
        {
            PowerState::Ac
        }
    }
}

/// Fixed power state, for configuration overrides and tests
#[derive(Clone, Copy, Debug)]
pub struct FixedPowerSource(
    /// The state to report
    pub PowerState,
);

impl PowerSource for FixedPowerSource {
    fn state(&self) -> PowerState {
        self.0
    }
}

// ============================================================================
// Power Budget
// ============================================================================

/// Per-user budget state; all access happens under the engine's per-user lock
#[derive(Clone, Debug)]
pub struct PowerBudget {
    /// Daily budget in watt-hours
    pub daily_budget_wh: f64,
    /// Energy charged since the last daily reset
    pub used_today_wh: f64,
    /// When the daily window last rolled
    pub last_daily_reset: Instant,
    /// Hourly NVIDIA-class request quota
    pub nvidia_quota_per_hour: u32,
    /// NVIDIA-class requests since the last hourly reset
    pub nvidia_used_this_hour: u32,
    /// When the hourly window last rolled
    pub last_nvidia_reset: Instant,
    /// Daily spend budget in dollars
    pub daily_budget_usd: f64,
    /// Spend charged since the last daily reset
    pub used_today_usd: f64,
}

impl PowerBudget {
    /// Fresh budget for a tier
    #[must_use]
    pub fn for_tier(tier: UserTier) -> Self {
        let now = Instant::now();
        Self {
            daily_budget_wh: tier.daily_budget_wh(),
            used_today_wh: 0.0,
            last_daily_reset: now,
            nvidia_quota_per_hour: tier.nvidia_quota_per_hour(),
            nvidia_used_this_hour: 0,
            last_nvidia_reset: now,
            daily_budget_usd: tier.daily_budget_usd(),
            used_today_usd: 0.0,
        }
    }

    /// Unused daily energy
    #[must_use]
    pub fn remaining_wh(&self) -> f64 {
        (self.daily_budget_wh - self.used_today_wh).max(0.0)
    }
}

// ============================================================================
// Energy Estimation
// ============================================================================

/// Fixed (tokens/sec, watts) pairs per hardware class
fn energy_profile(hardware: HardwareClass) -> (f64, f64) {
    match hardware {
        HardwareClass::Npu => (10.0, 3.0),
        HardwareClass::Igpu => (22.0, 12.0),
        HardwareClass::DiscreteGpu => (65.0, 55.0),
        HardwareClass::Cpu => (6.0, 28.0),
        // Cloud backends burn someone else's watts; bill them like an iGPU
        HardwareClass::Cloud => (22.0, 12.0),
    }
}

/// Estimated energy for generating `tokens` on `hardware`, in watt-hours
#[must_use]
pub fn estimate_energy_wh(hardware: HardwareClass, tokens: u32) -> f64 {
    let (tokens_per_sec, watts) = energy_profile(hardware);
    watts * (f64::from(tokens) / tokens_per_sec) / 3600.0
}

/// Declared draw for a hardware class, used for battery-cap comparisons
#[must_use]
pub fn declared_power_watts(hardware: HardwareClass) -> f64 {
    energy_profile(hardware).1
}

// ============================================================================
// Recommendation
// ============================================================================

/// Outcome of a policy-aware backend recommendation
#[derive(Clone, Debug)]
pub struct BackendRecommendation {
    /// The hardware class to dispatch to
    pub hardware: HardwareClass,
    /// The originally requested class, when a downgrade happened
    pub downgraded_from: Option<HardwareClass>,
    /// Why the downgrade happened, when it did
    pub notice: Option<String>,
    /// The budget error that forced the downgrade, when budget was the cause
    pub budget_error: Option<PipelineError>,
}

// ============================================================================
// Policy Engine
// ============================================================================

/// Budget and power policy engine
pub struct PolicyEngine {
    budgets: DashMap<String, Arc<Mutex<PowerBudget>>>,
    power_source: Arc<dyn PowerSource>,
    daily_window: Duration,
    hourly_window: Duration,
}

impl PolicyEngine {
    /// Create an engine reading real platform power state
    #[must_use]
    pub fn new() -> Self {
        Self::with_power_source(Arc::new(SysfsPowerSource))
    }

    /// Create an engine with an injected power source
    #[must_use]
    pub fn with_power_source(power_source: Arc<dyn PowerSource>) -> Self {
        Self {
            budgets: DashMap::new(),
            power_source,
            daily_window: Duration::from_secs(24 * 60 * 60),
            hourly_window: Duration::from_secs(60 * 60),
        }
    }

    /// Shrink the rollover windows; test-only knob
    #[must_use]
    pub fn with_windows(mut self, daily: Duration, hourly: Duration) -> Self {
        self.daily_window = daily;
        self.hourly_window = hourly;
        self
    }

    /// Get or lazily create the budget for a user
    pub fn budget_for(&self, user: &str, tier: UserTier) -> Arc<Mutex<PowerBudget>> {
        self.budgets
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PowerBudget::for_tier(tier))))
            .clone()
    }

    /// Snapshot a user's budget, if one exists
    #[must_use]
    pub fn budget_snapshot(&self, user: &str) -> Option<PowerBudget> {
        self.budgets.get(user).map(|b| b.lock().clone())
    }

    /// Number of users with materialized budgets
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.budgets.len()
    }

    /// Atomically check the budget and charge the request
    ///
    /// Window rollover, quota check, budget check and the deduction all
    /// happen under one lock. On failure the error carries a cheaper
    /// suggestion the caller may retry with.
    pub fn check_and_deduct(
        &self,
        user: &str,
        tier: UserTier,
        hardware: HardwareClass,
        estimated_wh: f64,
    ) -> Result<(), PipelineError> {
        let budget = self.budget_for(user, tier);
        let mut budget = budget.lock();

        // Lazy rollover happens before the current request is charged
        if budget.last_daily_reset.elapsed() >= self.daily_window {
            budget.used_today_wh = 0.0;
            budget.used_today_usd = 0.0;
            budget.last_daily_reset = Instant::now();
            tracing::debug!(user = %user, "Daily budget window rolled");
        }
        if budget.last_nvidia_reset.elapsed() >= self.hourly_window {
            budget.nvidia_used_this_hour = 0;
            budget.last_nvidia_reset = Instant::now();
            tracing::debug!(user = %user, "Hourly NVIDIA window rolled");
        }

        if hardware.is_nvidia_class() && budget.nvidia_used_this_hour >= budget.nvidia_quota_per_hour
        {
            let elapsed = budget.last_nvidia_reset.elapsed();
            let reset_in = self.hourly_window.saturating_sub(elapsed);
            return Err(PipelineError::NvidiaQuotaExceeded {
                user: user.to_string(),
                used: budget.nvidia_used_this_hour,
                quota: budget.nvidia_quota_per_hour,
                reset_in,
                suggested: suggest_alternative(&budget, hardware).as_str().to_string(),
            });
        }

        if budget.used_today_wh + estimated_wh > budget.daily_budget_wh {
            return Err(PipelineError::DailyEnergyExceeded {
                user: user.to_string(),
                used_wh: budget.used_today_wh,
                budget_wh: budget.daily_budget_wh,
                suggested: suggest_alternative(&budget, hardware).as_str().to_string(),
            });
        }

        if hardware.is_nvidia_class() {
            budget.nvidia_used_this_hour += 1;
        }
        budget.used_today_wh += estimated_wh;
        Ok(())
    }

    /// Highest declared power the platform currently tolerates, in watts
    #[must_use]
    pub fn max_allowed_power(&self) -> f64 {
        match self.power_source.state() {
            PowerState::Ac => 999.0,
            PowerState::Battery { percent } => {
                if percent < 20 {
                    5.0
                } else if percent < 50 {
                    15.0
                } else if percent < 80 {
                    30.0
                } else {
                    999.0
                }
            }
        }
    }

    /// Whether new work should be throttled right now
    ///
    /// True during night hours (22:00-06:00 local) or on a low battery.
    #[must_use]
    pub fn should_throttle(&self) -> bool {
        let hour = chrono::Local::now().hour() as u8;
        self.should_throttle_at(hour)
    }

    /// Throttle decision for an explicit local hour; testable core of
    /// [`should_throttle`](Self::should_throttle)
    #[must_use]
    pub fn should_throttle_at(&self, local_hour: u8) -> bool {
        if local_hour >= 22 || local_hour < 6 {
            return true;
        }
        matches!(
            self.power_source.state(),
            PowerState::Battery { percent } if percent < 30
        )
    }

    /// Budget- and battery-aware backend recommendation
    ///
    /// Charges the budget for the requested class when it fits; otherwise
    /// picks a cheaper class and reports why. Either way the final choice is
    /// then capped by the battery-aware power limit.
    pub fn get_recommended_backend(
        &self,
        user: &str,
        tier: UserTier,
        requested: HardwareClass,
        est_tokens: u32,
    ) -> BackendRecommendation {
        let estimated_wh = estimate_energy_wh(requested, est_tokens);

        let (mut chosen, budget_error) =
            match self.check_and_deduct(user, tier, requested, estimated_wh) {
                Ok(()) => (requested, None),
                Err(e) => {
                    let budget = self.budget_for(user, tier);
                    let suggestion = suggest_alternative(&budget.lock(), requested);
                    tracing::info!(
                        user = %user,
                        requested = %requested,
                        suggested = %suggestion,
                        "Budget downgrade"
                    );
                    (suggestion, Some(e))
                }
            };

        let mut downgraded_from = budget_error.as_ref().map(|_| requested);
        let mut notice = budget_error
            .as_ref()
            .map(|e| format!("budget downgrade: {e}"));

        let cap = self.max_allowed_power();
        if declared_power_watts(chosen) > cap {
            let capped = if cap >= 12.0 {
                HardwareClass::Igpu
            } else {
                HardwareClass::Npu
            };
            notice = Some(format!(
                "power cap {cap:.0}W forces {chosen} -> {capped}"
            ));
            downgraded_from.get_or_insert(chosen);
            chosen = capped;
        }

        BackendRecommendation {
            hardware: chosen,
            downgraded_from,
            notice,
            budget_error,
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheaper class to suggest when the budget rejects a request
fn suggest_alternative(budget: &PowerBudget, requested: HardwareClass) -> HardwareClass {
    let remaining = budget.remaining_wh();
    if remaining < 1.0 {
        HardwareClass::Npu
    } else if remaining < 10.0 {
        HardwareClass::Igpu
    } else if requested.is_nvidia_class()
        && budget.nvidia_used_this_hour >= budget.nvidia_quota_per_hour
    {
        HardwareClass::Igpu
    } else {
        requested
    }
}
