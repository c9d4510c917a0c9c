// Drives a set of cities that share one thread: wires in-process links
// between them and steps them tick by tick.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::city::City;
use crate::error::LinkError;
use crate::stats::CitySnapshot;
use crate::transport::queue_link;
use crate::types::CityName;

#[derive(Default)]
pub struct Scheduler {
    cities: Vec<City>,
    tick: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_city(&mut self, city: City) -> Result<(), LinkError> {
        if self.position(city.name()).is_some() {
            return Err(LinkError::NameTaken(city.name().clone()));
        }
        self.cities.push(city);
        Ok(())
    }

    pub fn city(&self, name: &CityName) -> Option<&City> {
        self.cities.iter().find(|c| c.name() == name)
    }

    pub fn city_mut(&mut self, name: &CityName) -> Option<&mut City> {
        self.cities.iter_mut().find(|c| c.name() == name)
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    fn position(&self, name: &CityName) -> Option<usize> {
        self.cities.iter().position(|c| c.name() == name)
    }

    /// Link `a` and `b` both ways with bounded in-process queues.
    pub fn connect_local(
        &mut self,
        a: &CityName,
        b: &CityName,
        capacity: usize,
    ) -> Result<(), LinkError> {
        if a == b {
            return Err(LinkError::SelfLink(a.clone()));
        }
        let ia = self
            .position(a)
            .ok_or_else(|| LinkError::UnknownCity(a.clone()))?;
        let ib = self
            .position(b)
            .ok_or_else(|| LinkError::UnknownCity(b.clone()))?;
        let taken = |city: &City, remote: &CityName| {
            city.has_inbound(remote) || city.has_outbound(remote)
        };
        if taken(&self.cities[ia], b) || taken(&self.cities[ib], a) {
            return Err(LinkError::Duplicate {
                local: a.clone(),
                remote: b.clone(),
            });
        }

        let (a_to_b, b_from_a) = queue_link(a.clone(), b.clone(), capacity);
        let (b_to_a, a_from_b) = queue_link(b.clone(), a.clone(), capacity);
        self.cities[ia].add_outbound(Box::new(a_to_b))?;
        self.cities[ia].add_inbound(Box::new(a_from_b))?;
        self.cities[ib].add_outbound(Box::new(b_to_a))?;
        self.cities[ib].add_inbound(Box::new(b_from_a))?;

        tracing::info!(%a, %b, capacity, "cities linked");
        Ok(())
    }

    /// Step every city once, in the order they were added.
    pub fn run_tick(&mut self) -> Vec<CitySnapshot> {
        self.tick += 1;
        self.cities.iter_mut().map(City::step).collect()
    }

    /// Run `ticks` ticks back to back and return the last round of snapshots.
    pub fn run(&mut self, ticks: u64) -> Vec<CitySnapshot> {
        let mut last = Vec::new();
        for _ in 0..ticks {
            last = self.run_tick();
        }
        last
    }

    /// One tick every `period` until `shutdown` fires. Returns the number of
    /// ticks run. A slow tick delays the next one rather than bunching.
    pub async fn run_paced(&mut self, period: Duration, shutdown: CancellationToken) -> u64 {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ran = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_tick();
                    ran += 1;
                }
            }
        }
        tracing::info!(ticks = ran, "scheduler stopped");
        ran
    }
}
