//! Synthetic environment feed for running without a sensor station.
//!
//! Writes one sample per interval: diurnal temperature and light curves with
//! seeded noise, humidity tracking temperature inversely, and soil moisture
//! that dries out during the day.

use crate::models::environment::EnvironmentSample;
use crate::ports::EnvironmentStore;
use chrono::{NaiveDateTime, Timelike};
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_SEED: u64 = 0x6EE4_0C0F_FEE5_EED5;

pub struct EnvironmentSimulator {
    rng: SmallRng,
    moisture: f64,
}

impl EnvironmentSimulator {
    pub fn new(seed: Option<u64>) -> Self {
        EnvironmentSimulator {
            rng: SmallRng::seed_from_u64(seed.unwrap_or(DEFAULT_SEED)),
            moisture: 0.8,
        }
    }

    pub fn sample_at(&mut self, at: NaiveDateTime) -> EnvironmentSample {
        let day_fraction = at.time().num_seconds_from_midnight() as f64 / 86_400.0;
        let temperature = self.temperature(day_fraction);
        let light = self.light(day_fraction);
        let humidity = self.humidity(temperature);
        let moisture = self.moisture(light);
        EnvironmentSample {
            temperature: Some(round1(temperature)),
            humidity: Some(round1(humidity)),
            moisture: Some((moisture * 100.0).round() / 100.0),
            light: Some(light.round()),
            updated: Some(at),
        }
    }

    fn temperature(&mut self, day_fraction: f64) -> f64 {
        // Peaks mid-afternoon.
        let diurnal = ((day_fraction - 0.375) * 2.0 * PI).sin() * 7.0;
        let noise = self.rng.random_range(-0.8..=0.8);
        (24.0 + diurnal + noise).clamp(5.0, 45.0)
    }

    fn light(&mut self, day_fraction: f64) -> f64 {
        let daylight = ((day_fraction - 0.5) * 2.0 * PI).cos().max(0.0);
        let cloud_cover = self.rng.random_range(0.4..=1.0);
        (daylight * 60_000.0 * cloud_cover).clamp(0.0, 100_000.0)
    }

    fn humidity(&mut self, temperature: f64) -> f64 {
        let noise = self.rng.random_range(-4.0..=4.0);
        (95.0 - (temperature - 10.0) * 1.6 + noise).clamp(25.0, 99.0)
    }

    fn moisture(&mut self, light: f64) -> f64 {
        let drying = 0.002 + light / 100_000.0 * 0.01;
        self.moisture = (self.moisture - drying).max(0.15);
        if self.moisture <= 0.2 && self.rng.random_bool(0.1) {
            self.moisture = 0.9;
        }
        self.moisture
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Replace the environment sample every `interval` for the process lifetime.
pub async fn run_feed<S: EnvironmentStore + 'static>(store: Arc<S>, interval: Duration, seed: Option<u64>) {
    let mut simulator = EnvironmentSimulator::new(seed);
    let mut ticker = tokio::time::interval(interval);
    info!("Simulation: environment feed every {}s", interval.as_secs());
    loop {
        ticker.tick().await;
        let sample = simulator.sample_at(chrono::Local::now().naive_local());
        if let Err(e) = store.replace_sample(sample).await {
            warn!("Simulation: writing sample failed: {}", e);
        }
    }
}
