//! Construction-time configuration for the simulator and its components.
//!
//! Every struct deserializes with `#[serde(default)]`, so a JSON document only
//! needs the fields it overrides. The defaults are representative values, not
//! calibrated ones.

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::MAX_ORDER_SIZE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Currency value of one price tick.
    pub tick_size: f64,
    pub initial_midprice: f64,
    pub initial_spread: f64,
    pub seed: u64,
    /// Levels of seed liquidity placed on each side at construction.
    pub initial_depth_levels: usize,
    pub initial_level_size: u64,
    /// Extra size added per level further from the touch.
    pub level_size_step: u64,
    /// Levels per side used for the order-book imbalance.
    pub imbalance_depth: usize,
    /// Upper bound on the steps a single `run` call takes.
    pub max_run_steps: usize,
    pub order_flow: OrderFlowConfig,
    pub impact: ImpactConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_size: 0.01,
            initial_midprice: 100.0,
            initial_spread: 0.02,
            seed: 0,
            initial_depth_levels: 10,
            initial_level_size: 100,
            level_size_step: 10,
            imbalance_depth: 5,
            max_run_steps: 1_000_000,
            order_flow: OrderFlowConfig::default(),
            impact: ImpactConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("tick_size", self.tick_size)?;
        positive("initial_midprice", self.initial_midprice)?;
        non_negative("initial_spread", self.initial_spread)?;
        if self.initial_midprice - self.initial_spread / 2.0 < self.tick_size {
            return Err(ConfigError::invalid(
                "initial_spread",
                "bid side of the initial quote must be at least one tick",
            ));
        }
        if self.initial_depth_levels > 0 && self.initial_level_size == 0 {
            return Err(ConfigError::invalid("initial_level_size", "seed levels need a positive size"));
        }
        if self.initial_depth_levels > 0 {
            let deepest = (self.initial_depth_levels as u64 - 1)
                .checked_mul(self.level_size_step)
                .and_then(|extra| extra.checked_add(self.initial_level_size));
            if deepest.is_none_or(|size| size > MAX_ORDER_SIZE) {
                return Err(ConfigError::invalid("level_size_step", "seed level sizes exceed the order size limit"));
            }
        }
        if self.imbalance_depth == 0 {
            return Err(ConfigError::invalid("imbalance_depth", "must cover at least one level"));
        }
        if self.max_run_steps == 0 {
            return Err(ConfigError::invalid("max_run_steps", "must allow at least one step"));
        }
        self.order_flow.validate()?;
        self.impact.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderFlowConfig {
    /// Poisson arrival rates, events per simulated second.
    pub limit_rate: f64,
    pub market_rate: f64,
    pub cancel_rate: f64,

    pub size: SizeDistribution,
    pub min_size: u64,
    pub max_size: u64,

    /// Distance of new limit orders from the touch, in ticks.
    pub mean_offset_ticks: f64,
    pub offset_std_ticks: f64,

    pub market_buy_probability: f64,

    pub regimes: Vec<RegimeConfig>,
    /// Chance of leaving the current regime at each generated event.
    pub regime_switch_probability: f64,

    pub mean_latency: f64,
    pub latency_std: f64,
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            limit_rate: 10.0,
            market_rate: 2.0,
            cancel_rate: 5.0,
            size: SizeDistribution::default(),
            min_size: 10,
            max_size: 500,
            mean_offset_ticks: 2.0,
            offset_std_ticks: 3.0,
            market_buy_probability: 0.5,
            regimes: vec![RegimeConfig::calm(), RegimeConfig::turbulent()],
            regime_switch_probability: 0.1,
            mean_latency: 0.001,
            latency_std: 0.0005,
        }
    }
}

impl OrderFlowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("order_flow.limit_rate", self.limit_rate)?;
        non_negative("order_flow.market_rate", self.market_rate)?;
        non_negative("order_flow.cancel_rate", self.cancel_rate)?;
        self.size.validate()?;
        if self.max_size < self.min_size.max(1) {
            return Err(ConfigError::invalid("order_flow.max_size", "must be at least max(1, min_size)"));
        }
        if self.max_size > MAX_ORDER_SIZE {
            return Err(ConfigError::invalid("order_flow.max_size", "exceeds the order size limit"));
        }
        finite("order_flow.mean_offset_ticks", self.mean_offset_ticks)?;
        non_negative("order_flow.offset_std_ticks", self.offset_std_ticks)?;
        probability("order_flow.market_buy_probability", self.market_buy_probability)?;
        if self.regimes.is_empty() {
            return Err(ConfigError::invalid("order_flow.regimes", "at least one regime is required"));
        }
        for regime in &self.regimes {
            regime.validate()?;
        }
        probability("order_flow.regime_switch_probability", self.regime_switch_probability)?;
        non_negative("order_flow.mean_latency", self.mean_latency)?;
        non_negative("order_flow.latency_std", self.latency_std)
    }
}

/// Shape of sampled order sizes before clamping to `[max(1, min_size), max_size]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizeDistribution {
    Gaussian { mean: f64, std: f64 },
    LogNormal { mu: f64, sigma: f64 },
}

impl Default for SizeDistribution {
    fn default() -> Self {
        SizeDistribution::Gaussian {
            mean: 100.0,
            std: 30.0,
        }
    }
}

impl SizeDistribution {
    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            SizeDistribution::Gaussian { mean, std } => {
                finite("order_flow.size.mean", mean)?;
                non_negative("order_flow.size.std", std)
            }
            SizeDistribution::LogNormal { mu, sigma } => {
                finite("order_flow.size.mu", mu)?;
                non_negative("order_flow.size.sigma", sigma)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Per-second volatility of the reference price, in currency units.
    pub volatility: f64,
    /// Multiplier on the size distribution's spread.
    pub size_dispersion: f64,
    /// Multiplier on the limit price offset spread.
    pub price_dispersion: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self::calm()
    }
}

impl RegimeConfig {
    pub fn calm() -> Self {
        Self {
            volatility: 0.02,
            size_dispersion: 1.0,
            price_dispersion: 1.0,
        }
    }

    pub fn turbulent() -> Self {
        Self {
            volatility: 0.06,
            size_dispersion: 1.5,
            price_dispersion: 3.0,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_negative("order_flow.regimes.volatility", self.volatility)?;
        non_negative("order_flow.regimes.size_dispersion", self.size_dispersion)?;
        non_negative("order_flow.regimes.price_dispersion", self.price_dispersion)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub enabled: bool,
    pub model: ImpactModelConfig,
    /// Exponential decay rate of temporary impact, per second.
    pub decay_rate: f64,
    /// Temporary contributions below this magnitude are dropped.
    pub prune_epsilon: f64,
    pub max_records: usize,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: ImpactModelConfig::default(),
            decay_rate: 0.5,
            prune_epsilon: 1e-9,
            max_records: 1024,
        }
    }
}

impl ImpactConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("impact.decay_rate", self.decay_rate)?;
        non_negative("impact.prune_epsilon", self.prune_epsilon)?;
        if self.max_records == 0 {
            return Err(ConfigError::invalid("impact.max_records", "must keep at least one record"));
        }
        self.model.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImpactModelConfig {
    AlmgrenChriss {
        eta: f64,
        gamma: f64,
        epsilon: f64,
        horizon: f64,
    },
    SquareRoot {
        beta: f64,
        daily_volume: f64,
        permanent_fraction: f64,
    },
    Linear {
        alpha: f64,
        permanent_fraction: f64,
    },
}

impl Default for ImpactModelConfig {
    fn default() -> Self {
        ImpactModelConfig::AlmgrenChriss {
            eta: 0.001,
            gamma: 0.0001,
            epsilon: 0.0,
            horizon: 1.0,
        }
    }
}

impl ImpactModelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            ImpactModelConfig::AlmgrenChriss {
                eta,
                gamma,
                epsilon,
                horizon,
            } => {
                non_negative("impact.model.eta", eta)?;
                non_negative("impact.model.gamma", gamma)?;
                non_negative("impact.model.epsilon", epsilon)?;
                positive("impact.model.horizon", horizon)
            }
            ImpactModelConfig::SquareRoot {
                beta,
                daily_volume,
                permanent_fraction,
            } => {
                non_negative("impact.model.beta", beta)?;
                positive("impact.model.daily_volume", daily_volume)?;
                probability("impact.model.permanent_fraction", permanent_fraction)
            }
            ImpactModelConfig::Linear {
                alpha,
                permanent_fraction,
            } => {
                non_negative("impact.model.alpha", alpha)?;
                probability("impact.model.permanent_fraction", permanent_fraction)
            }
        }
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is not a finite number")))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(ConfigError::invalid(field, format!("{value} is negative")));
    }
    Ok(())
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value <= 0.0 {
        return Err(ConfigError::invalid(field, format!("{value} is not positive")));
    }
    Ok(())
}

fn probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")));
    }
    Ok(())
}
