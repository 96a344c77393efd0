//! Price signal providers.
//!
//! A signal provider consumes the stream of pair prices and exposes a
//! predicted forward log-return in fractional bps. The production family
//! is a capped linear combination of EMA residuals; the dummy and random
//! variants exist for simulation and tests.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Streaming price-to-signal transform for one pair.
pub trait PriceSignalProvider: Send {
    fn update(&mut self, t: DateTime<Utc>, price: f64);

    /// Predicted forward log-return in fractional bps.
    fn value(&self) -> f64;
}

/// One EMA component: timescale and regression coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmaSignalParam {
    pub timescale_seconds: u32,
    pub beta: f64,
}

/// Time-decayed EMA residual feature: (price - ema) / price.
#[derive(Debug, Clone)]
struct PriceEmaFeature {
    timescale_seconds: u32,
    ema: Option<f64>,
    last_t: Option<DateTime<Utc>>,
    value: f64,
}

impl PriceEmaFeature {
    fn new(timescale_seconds: u32) -> Self {
        assert!(timescale_seconds > 0);
        Self {
            timescale_seconds,
            ema: None,
            last_t: None,
            value: 0.0,
        }
    }

    fn update(&mut self, t: DateTime<Utc>, price: f64) {
        let ema = match (self.ema, self.last_t) {
            (Some(prev), Some(t_prev)) => {
                let dt = (t - t_prev).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
                let alpha = 1.0 - (-dt / self.timescale_seconds as f64).exp();
                alpha * price + (1.0 - alpha) * prev
            }
            _ => price,
        };
        self.ema = Some(ema);
        self.last_t = Some(t);
        self.value = (price - ema) / price;
    }
}

/// Capped linear combination of EMA residuals.
pub struct EmaSignalProvider {
    features: Vec<PriceEmaFeature>,
    betas: Vec<f64>,
    cap: f64,
}

impl EmaSignalProvider {
    /// `cap` bounds the emitted signal to [-cap, +cap]; it is mandatory
    /// because it bounds worst-case sizing downstream.
    pub fn new(params: &[EmaSignalParam], cap: f64) -> Self {
        assert!(cap > 0.0 && cap <= 1.0, "signal cap must be in (0, 1]");
        Self {
            features: params
                .iter()
                .map(|p| PriceEmaFeature::new(p.timescale_seconds))
                .collect(),
            betas: params.iter().map(|p| p.beta).collect(),
            cap,
        }
    }
}

impl PriceSignalProvider for EmaSignalProvider {
    fn update(&mut self, t: DateTime<Utc>, price: f64) {
        for feature in &mut self.features {
            feature.update(t, price);
        }
    }

    fn value(&self) -> f64 {
        let raw: f64 = self
            .betas
            .iter()
            .zip(&self.features)
            .map(|(beta, feature)| beta * feature.value)
            .sum();
        raw.clamp(-self.cap, self.cap)
    }
}

/// Constant signal, optionally flipping sign on every update.
pub struct DummySignalProvider {
    value: f64,
    alternate: bool,
}

impl DummySignalProvider {
    pub fn new(value: f64, alternate: bool) -> Self {
        Self { value, alternate }
    }

    pub fn zero() -> Self {
        Self::new(0.0, false)
    }
}

impl PriceSignalProvider for DummySignalProvider {
    fn update(&mut self, _t: DateTime<Utc>, _price: f64) {
        if self.alternate {
            self.value = -self.value;
        }
    }

    fn value(&self) -> f64 {
        self.value
    }
}

/// Gaussian noise signal, N(0, std_bps^2) drawn on every update.
/// Simulation only; seeded so backtests stay deterministic.
pub struct RandomSignalProvider {
    dist: Normal<f64>,
    rng: StdRng,
    state: f64,
}

impl RandomSignalProvider {
    pub fn new(std_bps: f64, seed: u64) -> Self {
        Self {
            dist: Normal::new(0.0, std_bps).expect("invalid std"),
            rng: StdRng::seed_from_u64(seed),
            state: 0.0,
        }
    }
}

impl PriceSignalProvider for RandomSignalProvider {
    fn update(&mut self, _t: DateTime<Utc>, _price: f64) {
        self.state = self.dist.sample(&mut self.rng);
    }

    fn value(&self) -> f64 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(offset_seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + offset_seconds, 0).unwrap()
    }

    #[test]
    fn test_ema_recovery_on_constant_input() {
        let params = [
            EmaSignalParam { timescale_seconds: 60, beta: 0.5 },
            EmaSignalParam { timescale_seconds: 600, beta: -0.3 },
        ];
        let mut provider = EmaSignalProvider::new(&params, 0.05);

        for i in 0..100 {
            provider.update(t(i * 30), 1.25);
        }
        assert_eq!(provider.value(), 0.0);
    }

    #[test]
    fn test_ema_tracks_step_change() {
        let params = [EmaSignalParam { timescale_seconds: 60, beta: 1.0 }];
        let mut provider = EmaSignalProvider::new(&params, 1.0);

        provider.update(t(0), 1.0);
        provider.update(t(60), 2.0);

        // alpha = 1 - e^-1, ema = alpha*2 + (1-alpha)*1
        let alpha = 1.0 - (-1.0f64).exp();
        let ema = alpha * 2.0 + (1.0 - alpha) * 1.0;
        let expected = (2.0 - ema) / 2.0;
        assert!((provider.value() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cap_bounds_signal() {
        let params = [EmaSignalParam { timescale_seconds: 60, beta: 100.0 }];
        let mut provider = EmaSignalProvider::new(&params, 0.01);

        provider.update(t(0), 1.0);
        provider.update(t(3600), 10.0);
        assert_eq!(provider.value(), 0.01);
    }

    #[test]
    #[should_panic(expected = "cap")]
    fn test_cap_is_mandatory() {
        EmaSignalProvider::new(&[], 0.0);
    }

    #[test]
    fn test_dummy_alternates() {
        let mut provider = DummySignalProvider::new(0.01, true);
        provider.update(t(0), 1.0);
        assert_eq!(provider.value(), -0.01);
        provider.update(t(1), 1.0);
        assert_eq!(provider.value(), 0.01);
    }

    #[test]
    fn test_random_provider_is_deterministic_per_seed() {
        let mut a = RandomSignalProvider::new(10.0, 42);
        let mut b = RandomSignalProvider::new(10.0, 42);
        for i in 0..10 {
            a.update(t(i), 1.0);
            b.update(t(i), 1.0);
            assert_eq!(a.value(), b.value());
        }
    }
}
