//! Bounded batch polling of zone state.
//!
//! A batch issues one [`get_zone_state`](ChameleonClient::get_zone_state)
//! per zone. Queries pass through a counting semaphore before reaching the
//! serialized connection, so at most `poll_concurrency` of them are in
//! flight or queued on the lock at any moment. Each zone's result is kept
//! separately: a zone that times out is reported as a failure while its
//! siblings still return state.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use chameleon_core::error::{Error, Result};
use chameleon_core::types::{ZoneId, ZoneState};

use crate::client::ChameleonClient;

/// Per-zone results of one batch poll, in request order.
#[derive(Debug)]
pub struct ZoneBatch {
    results: Vec<(ZoneId, Result<ZoneState>)>,
}

impl ZoneBatch {
    /// States of the zones that answered.
    pub fn states(&self) -> impl Iterator<Item = &ZoneState> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().ok())
    }

    /// Zones that failed, with the reason.
    pub fn failures(&self) -> impl Iterator<Item = (ZoneId, &Error)> {
        self.results
            .iter()
            .filter_map(|(zone, r)| r.as_ref().err().map(|e| (*zone, e)))
    }

    /// Result for one zone, if it was part of the batch.
    pub fn get(&self, zone: ZoneId) -> Option<&Result<ZoneState>> {
        self.results
            .iter()
            .find(|(z, _)| *z == zone)
            .map(|(_, r)| r)
    }

    /// Number of zones that answered.
    pub fn success_count(&self) -> usize {
        self.states().count()
    }

    /// Number of zones that failed.
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Number of zones polled.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// `true` if no zones were polled.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Consume the batch, yielding `(zone, result)` pairs in request order.
    pub fn into_results(self) -> Vec<(ZoneId, Result<ZoneState>)> {
        self.results
    }
}

impl ChameleonClient {
    /// Poll the state of every zone in `zones`.
    ///
    /// Never fails as a whole; inspect [`ZoneBatch::failures`] for zones
    /// that did not answer.
    pub async fn get_all_zone_states(&self, zones: &[ZoneId]) -> ZoneBatch {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for (index, &zone) in zones.iter().enumerate() {
            let client = self.clone();
            let gate = Arc::clone(&self.poll_gate);
            tasks.spawn(async move {
                let result = match gate.acquire_owned().await {
                    Ok(_permit) => client.get_zone_state(zone).await,
                    Err(_) => Err(Error::Transport("poll gate closed".into())),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<ZoneState>>> = zones.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "Zone poll task failed"),
            }
        }

        let results: Vec<(ZoneId, Result<ZoneState>)> = zones
            .iter()
            .zip(slots)
            .map(|(&zone, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(Error::Transport(format!("poll task for zone {zone} did not finish")))
                });
                if let Err(e) = &result {
                    debug!(zone = %zone, error = %e, "Zone poll failed");
                }
                (zone, result)
            })
            .collect();

        let batch = ZoneBatch { results };
        info!(
            zones = batch.len(),
            ok = batch.success_count(),
            failed = batch.failure_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Zone poll complete"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionConfig};
    use chameleon_core::types::{MuteState, Volume};
    use chameleon_test_harness::{FakeChameleon, FakeOptions};
    use chameleon_transport::TcpConnector;
    use std::time::Duration;

    fn client_for(device: &FakeChameleon, concurrency: usize) -> ChameleonClient {
        let config = ConnectionConfig {
            command_timeout: Duration::from_millis(150),
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
            settle_delay: Duration::from_millis(10),
            ..ConnectionConfig::default()
        };
        let connector = TcpConnector::new(device.host(), device.port());
        ChameleonClient::new(Connection::new(Box::new(connector), config), concurrency)
    }

    fn zones(range: std::ops::RangeInclusive<u8>) -> Vec<ZoneId> {
        range.map(|z| ZoneId::new(z).unwrap()).collect()
    }

    #[tokio::test]
    async fn silent_zone_does_not_abort_the_batch() {
        let device = FakeChameleon::start().await.unwrap();
        device.set_silent_zone(5, true);
        let client = client_for(&device, 1);

        let batch = client.get_all_zone_states(&zones(1..=35)).await;

        assert_eq!(batch.len(), 35);
        assert_eq!(batch.success_count(), 34);
        let failures: Vec<_> = batch.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.get(), 5);
        assert!(failures[0].1.is_timeout());

        for z in (1..=4).chain(6..=35) {
            let state = batch
                .get(ZoneId::new(z).unwrap())
                .unwrap()
                .as_ref()
                .unwrap();
            assert_eq!(state.volume, Some(Volume::new(z).unwrap()));
            assert_eq!(state.mute, MuteState::Unmuted);
            assert_eq!(state.input.map(|i| i.get()), Some(1));
        }
        device.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_zone_is_reported_as_parse_error() {
        let device = FakeChameleon::start().await.unwrap();
        device.set_malformed_zone(3, true);
        let client = client_for(&device, 1);

        let batch = client.get_all_zone_states(&zones(1..=4)).await;
        let failures: Vec<_> = batch.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.get(), 3);
        assert!(matches!(failures[0].1, Error::Protocol(_)));
        assert!(!failures[0].1.is_timeout());
        device.shutdown().await;
    }

    #[tokio::test]
    async fn higher_concurrency_still_serializes() {
        let device = FakeChameleon::start_with(FakeOptions {
            response_delay: Duration::from_millis(1),
            ..FakeOptions::default()
        })
        .await
        .unwrap();
        let client = client_for(&device, 8);
        assert_eq!(client.poll_concurrency(), 8);

        let batch = client.get_all_zone_states(&zones(1..=64)).await;
        assert_eq!(batch.failure_count(), 0);
        let volumes: Vec<u8> = batch
            .states()
            .map(|s| s.volume.map(Volume::get).unwrap_or(255))
            .collect();
        let expected: Vec<u8> = (1..=64u8).map(|z| z % 64).collect();
        assert_eq!(volumes, expected);
        assert_eq!(device.connection_count(), 1);
        device.shutdown().await;
    }

    #[tokio::test]
    async fn empty_batch() {
        let device = FakeChameleon::start().await.unwrap();
        let client = client_for(&device, 1);
        let batch = client.get_all_zone_states(&[]).await;
        assert!(batch.is_empty());
        assert!(batch.into_results().is_empty());
        assert!(device.command_log().is_empty());
        device.shutdown().await;
    }
}
