//! Price impact of executed volume.
//!
//! A model turns one trade into a temporary and a permanent price shift,
//! signed by the aggressor's direction. [`MarketImpact`] keeps the running
//! permanent offset and a bounded list of decaying temporary contributions.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::{ImpactConfig, ImpactModelConfig},
    types::{Quantity, Side, Timestamp},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    pub temporary: f64,
    pub permanent: f64,
}

pub trait ImpactModel: fmt::Debug + Send {
    /// Price shift caused by `volume` traded by an aggressor on `side`.
    fn impact(&self, side: Side, volume: Quantity, volatility: f64) -> Impact;

    /// Cost of the trade to its aggressor: `|v| * (|temp| + |perm| / 2)`.
    fn execution_cost(&self, side: Side, volume: Quantity, volatility: f64) -> f64 {
        let impact = self.impact(side, volume, volatility);
        volume as f64 * (impact.temporary.abs() + impact.permanent.abs() / 2.0)
    }
}

/// Almgren-Chriss: temporary `eta * |v| / sqrt(T) * sigma + epsilon`,
/// permanent `gamma * v * sigma`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlmgrenChriss {
    pub eta: f64,
    pub gamma: f64,
    /// Fixed cost per trade.
    pub epsilon: f64,
    /// Execution horizon `T`.
    pub horizon: f64,
}

impl ImpactModel for AlmgrenChriss {
    fn impact(&self, side: Side, volume: Quantity, volatility: f64) -> Impact {
        if volume == 0 {
            return Impact::default();
        }
        let volume = volume as f64;
        let temporary = self.eta * volume / self.horizon.sqrt() * volatility + self.epsilon;
        Impact {
            temporary: side.sign() * temporary,
            permanent: side.sign() * self.gamma * volume * volatility,
        }
    }
}

/// Square-root law: `beta * sigma * sqrt(|v| / daily_volume)`, a fixed
/// fraction of which is permanent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareRoot {
    pub beta: f64,
    pub daily_volume: f64,
    pub permanent_fraction: f64,
}

impl ImpactModel for SquareRoot {
    fn impact(&self, side: Side, volume: Quantity, volatility: f64) -> Impact {
        if volume == 0 {
            return Impact::default();
        }
        let participation = volume as f64 / self.daily_volume;
        let temporary = side.sign() * self.beta * volatility * participation.sqrt();
        Impact {
            temporary,
            permanent: self.permanent_fraction * temporary,
        }
    }
}

/// `alpha * v`, split between the two components. Ignores volatility.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub alpha: f64,
    pub permanent_fraction: f64,
}

impl ImpactModel for Linear {
    fn impact(&self, side: Side, volume: Quantity, _volatility: f64) -> Impact {
        let total = side.sign() * self.alpha * volume as f64;
        Impact {
            temporary: total * (1.0 - self.permanent_fraction),
            permanent: total * self.permanent_fraction,
        }
    }
}

pub fn build_model(config: &ImpactModelConfig) -> Box<dyn ImpactModel> {
    match *config {
        ImpactModelConfig::AlmgrenChriss {
            eta,
            gamma,
            epsilon,
            horizon,
        } => Box::new(AlmgrenChriss {
            eta,
            gamma,
            epsilon,
            horizon,
        }),
        ImpactModelConfig::SquareRoot {
            beta,
            daily_volume,
            permanent_fraction,
        } => Box::new(SquareRoot {
            beta,
            daily_volume,
            permanent_fraction,
        }),
        ImpactModelConfig::Linear {
            alpha,
            permanent_fraction,
        } => Box::new(Linear {
            alpha,
            permanent_fraction,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactRecord {
    pub origin: Timestamp,
    pub magnitude: f64,
    pub decay_rate: f64,
}

impl ImpactRecord {
    pub fn value_at(&self, now: Timestamp) -> f64 {
        let elapsed = (now - self.origin).max(0.0);
        self.magnitude * (-self.decay_rate * elapsed).exp()
    }
}

#[derive(Debug)]
pub struct MarketImpact {
    model: Box<dyn ImpactModel>,
    enabled: bool,
    decay_rate: f64,
    prune_epsilon: f64,
    max_records: usize,
    records: VecDeque<ImpactRecord>,
    permanent: f64,
}

impl MarketImpact {
    pub fn new(model: Box<dyn ImpactModel>, decay_rate: f64) -> Self {
        let defaults = ImpactConfig::default();
        Self {
            model,
            enabled: true,
            decay_rate,
            prune_epsilon: defaults.prune_epsilon,
            max_records: defaults.max_records,
            records: VecDeque::new(),
            permanent: 0.0,
        }
    }

    pub fn from_config(config: &ImpactConfig) -> Self {
        Self {
            enabled: config.enabled,
            prune_epsilon: config.prune_epsilon,
            max_records: config.max_records.max(1),
            ..Self::new(build_model(&config.model), config.decay_rate)
        }
    }

    pub fn model(&self) -> &dyn ImpactModel {
        self.model.as_ref()
    }

    /// Books the impact of one trade: the temporary part starts decaying
    /// from `now`, the permanent part is added to the offset for good.
    pub fn on_trade(&mut self, now: Timestamp, side: Side, volume: Quantity, volatility: f64) -> Impact {
        if !self.enabled {
            return Impact::default();
        }

        let impact = self.model.impact(side, volume, volatility);
        if impact.temporary != 0.0 {
            self.records.push_back(ImpactRecord {
                origin: now,
                magnitude: impact.temporary,
                decay_rate: self.decay_rate,
            });
            // Oldest record has decayed the most
            while self.records.len() > self.max_records {
                self.records.pop_front();
            }
        }
        self.permanent += impact.permanent;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "impact",
            time = now,
            volume = volume,
            temporary = impact.temporary,
            permanent = impact.permanent,
            permanent_offset = self.permanent,
        );

        impact
    }

    /// Permanent offset plus every live temporary contribution at `now`.
    pub fn current_offset(&mut self, now: Timestamp) -> f64 {
        self.permanent + self.temporary_offset(now)
    }

    /// Sum of decayed temporary contributions. Records that have fallen
    /// below the prune threshold are dropped.
    pub fn temporary_offset(&mut self, now: Timestamp) -> f64 {
        let epsilon = self.prune_epsilon;
        self.records.retain(|record| record.value_at(now).abs() >= epsilon);
        self.records.iter().map(|record| record.value_at(now)).sum()
    }

    /// Same sum as [`MarketImpact::current_offset`] without pruning.
    pub fn offset_at(&self, now: Timestamp) -> f64 {
        self.permanent + self.records.iter().map(|record| record.value_at(now)).sum::<f64>()
    }

    pub fn permanent_offset(&self) -> f64 {
        self.permanent
    }

    pub fn records(&self) -> impl Iterator<Item = &ImpactRecord> {
        self.records.iter()
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.permanent = 0.0;
    }
}
