//! Prometheus metrics for ranges and guest clusters.
//!
//! The registry is owned by [`Metrics`] rather than the process-global
//! default, so tests can build as many instances as they like.
//!
//! Guest cluster series are not dropped the moment a FloatingIP goes away:
//! the cluster is queued and its series are removed by the cleanup task,
//! which does nothing while a sweep is writing the same series.

use crate::model::RangeRecord;
use crate::scheduler::PeriodicJob;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const RANGE_LABELS: &[&str] = &[
    "fiprangename",
    "fiprange",
    "harvesterclustername",
    "harvesternetworkname",
];
const GUEST_LABELS: &[&str] = &["guestclustername", "harvesterclustername"];
const EVENT_LABELS: &[&str] = &["guestclustername", "harvesterclustername", "event", "status"];

/// Per-target step reported on the events counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestEvent {
    Connectivity,
    Install,
    InstallSecondary,
    ConfigReconcile,
}

impl GuestEvent {
    pub const ALL: [GuestEvent; 4] = [
        GuestEvent::Connectivity,
        GuestEvent::Install,
        GuestEvent::InstallSecondary,
        GuestEvent::ConfigReconcile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GuestEvent::Connectivity => "connectivity",
            GuestEvent::Install => "install",
            GuestEvent::InstallSecondary => "install-secondary",
            GuestEvent::ConfigReconcile => "config-reconcile",
        }
    }
}

impl fmt::Display for GuestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub const ALL: [Outcome; 2] = [Outcome::Success, Outcome::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

#[derive(Debug, Default)]
struct GuestSeries {
    /// Provider label values written per guest cluster
    providers: BTreeMap<String, BTreeSet<String>>,
    queue: BTreeSet<String>,
}

/// Operator metrics and the deferred-removal queue.
pub struct Metrics {
    registry: Registry,
    range_capacity: IntGaugeVec,
    range_reserved: IntGaugeVec,
    guest_status: IntGaugeVec,
    guest_events: IntCounterVec,
    guests: Mutex<GuestSeries>,
    sweeping: AtomicBool,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("sweeping", &self.sweeping.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn range_labels(range: &RangeRecord) -> [&str; 4] {
    [
        range.name.as_str(),
        range.cidr.as_str(),
        range.harvester_cluster.as_deref().unwrap_or_default(),
        range.harvester_network.as_deref().unwrap_or_default(),
    ]
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let range_capacity = IntGaugeVec::new(
            Opts::new("kubefipoperator_fipranges_capacity", "Usable addresses per FloatingIPRange"),
            RANGE_LABELS,
        )?;
        let range_reserved = IntGaugeVec::new(
            Opts::new("kubefipoperator_fipranges_reserved", "Reserved addresses per FloatingIPRange"),
            RANGE_LABELS,
        )?;
        let guest_status = IntGaugeVec::new(
            Opts::new("kubefipoperator_guestcluster_status", "Guest cluster reachability (1 up, 0 down)"),
            GUEST_LABELS,
        )?;
        let guest_events = IntCounterVec::new(
            Opts::new("kubefipoperator_guestcluster_events", "Guest cluster operations by step and outcome"),
            EVENT_LABELS,
        )?;

        registry.register(Box::new(range_capacity.clone()))?;
        registry.register(Box::new(range_reserved.clone()))?;
        registry.register(Box::new(guest_status.clone()))?;
        registry.register(Box::new(guest_events.clone()))?;

        Ok(Self {
            registry,
            range_capacity,
            range_reserved,
            guest_status,
            guest_events,
            guests: Mutex::new(GuestSeries::default()),
            sweeping: AtomicBool::new(false),
        })
    }

    pub fn set_range_usage(&self, range: &RangeRecord, capacity: u32, reserved: usize) {
        let labels = range_labels(range);
        self.range_capacity.with_label_values(&labels).set(i64::from(capacity));
        self.range_reserved
            .with_label_values(&labels)
            .set(i64::try_from(reserved).unwrap_or(i64::MAX));
    }

    pub fn inc_reserved(&self, range: &RangeRecord) {
        self.range_reserved.with_label_values(&range_labels(range)).inc();
    }

    pub fn dec_reserved(&self, range: &RangeRecord) {
        self.range_reserved.with_label_values(&range_labels(range)).dec();
    }

    /// Drops both series of a removed range.
    pub fn remove_range(&self, range: &RangeRecord) {
        let labels = range_labels(range);
        if self.range_capacity.remove_label_values(&labels).is_err() {
            debug!("No capacity series for range {}", range.name);
        }
        if self.range_reserved.remove_label_values(&labels).is_err() {
            debug!("No reserved series for range {}", range.name);
        }
    }

    fn guests(&self) -> MutexGuard<'_, GuestSeries> {
        self.guests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, cluster: &str, provider: &str) {
        self.guests()
            .providers
            .entry(cluster.to_string())
            .or_default()
            .insert(provider.to_string());
    }

    pub fn set_guest_status(&self, cluster: &str, provider: &str, up: bool) {
        self.track(cluster, provider);
        self.guest_status
            .with_label_values(&[cluster, provider])
            .set(i64::from(up));
    }

    pub fn inc_guest_event(&self, cluster: &str, provider: &str, event: GuestEvent, outcome: Outcome) {
        self.track(cluster, provider);
        self.guest_events
            .with_label_values(&[cluster, provider, event.as_str(), outcome.as_str()])
            .inc();
    }

    /// Schedules removal of every series of a guest cluster.
    pub fn queue_cleanup(&self, cluster: &str) {
        self.guests().queue.insert(cluster.to_string());
    }

    pub fn pending_cleanup(&self) -> usize {
        self.guests().queue.len()
    }

    /// Removes the series of queued clusters. Returns how many clusters were
    /// processed, or `None` when skipped because a sweep is running.
    pub fn cleanup(&self) -> Option<usize> {
        if self.sweeping.load(Ordering::SeqCst) {
            debug!("Sweep in progress, skipping metrics cleanup");
            return None;
        }

        let mut guests = self.guests();
        let queued = std::mem::take(&mut guests.queue);
        for cluster in &queued {
            let providers = guests.providers.remove(cluster).unwrap_or_default();
            let mut removed = 0;
            for provider in &providers {
                if self
                    .guest_status
                    .remove_label_values(&[cluster.as_str(), provider.as_str()])
                    .is_err()
                {
                    debug!("No status series for guest cluster {} on {}", cluster, provider);
                }
                // only the event/outcome pairs that occurred have a series
                for event in GuestEvent::ALL {
                    for outcome in Outcome::ALL {
                        let labels = [cluster.as_str(), provider.as_str(), event.as_str(), outcome.as_str()];
                        if self.guest_events.remove_label_values(&labels).is_ok() {
                            removed += 1;
                        }
                    }
                }
            }
            debug!(
                "Removed metrics of guest cluster {} ({} provider labels, {} event series)",
                cluster,
                providers.len(),
                removed
            );
        }
        Some(queued.len())
    }

    /// Marks a sweep as running until the guard is dropped.
    pub fn begin_sweep(&self) -> SweepGuard<'_> {
        self.sweeping.store(true, Ordering::SeqCst);
        SweepGuard { metrics: self }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    /// Text exposition of every registered series.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

pub struct SweepGuard<'a> {
    metrics: &'a Metrics,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.metrics.sweeping.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PeriodicJob for Metrics {
    fn name(&self) -> &'static str {
        "metrics-cleanup"
    }

    async fn run(&self) {
        if let Some(removed) = self.cleanup() {
            if removed > 0 {
                debug!("Metrics cleanup removed {} guest clusters", removed);
            }
        }
    }
}
