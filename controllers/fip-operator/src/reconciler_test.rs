//! Unit tests for the event reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::inventory::Inventory;
    use crate::metrics::Metrics;
    use crate::model::{FipKey, RecordError};
    use crate::reconciler::{EventReconciler, SeedReport};
    use crate::source::FloatingIpSource;
    use crate::test_utils::*;
    use crds::annotations;
    use ipam::IpamError;
    use kube::ResourceExt;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    struct Harness {
        inventory: Arc<Inventory>,
        metrics: Arc<Metrics>,
        source: MemorySource,
        reconciler: EventReconciler,
    }

    fn harness() -> Harness {
        let inventory = Arc::new(Inventory::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let source = MemorySource::new();
        let reconciler = EventReconciler::new(inventory.clone(), metrics.clone(), Arc::new(source.clone()));
        Harness {
            inventory,
            metrics,
            source,
            reconciler,
        }
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_fip_allocates_and_persists() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();

        let fip = create_test_fip("c-m-1", "guest-kubevip", "guest", "lab", None);
        h.source.add_fip(fip.clone());
        h.reconciler.apply_floating_ip(&fip).await.unwrap();

        let key = FipKey::new("c-m-1", "guest-kubevip");
        assert_eq!(h.source.persisted(), vec![(key.clone(), ip("10.0.0.1"))]);
        assert_eq!(h.inventory.fip(&key).and_then(|r| r.address), Some(ip("10.0.0.1")));
        assert!(h.metrics.render().unwrap().contains("kubefipoperator_fipranges_reserved"));

        // the write-back echo is a no-op
        let echo = create_test_fip("c-m-1", "guest-kubevip", "guest", "lab", Some("10.0.0.1"));
        h.reconciler.apply_floating_ip(&echo).await.unwrap();
        assert_eq!(h.source.persisted().len(), 1);
        assert_eq!(h.inventory.allocated("lab"), vec![ip("10.0.0.1")]);
    }

    #[tokio::test]
    async fn test_persist_failure_rolls_back() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();
        h.source.fail_persist(true);

        let fip = create_test_fip("ns", "vip", "guest", "lab", None);
        assert!(h.reconciler.apply_floating_ip(&fip).await.is_err());
        assert!(h.inventory.fip(&FipKey::new("ns", "vip")).is_none());
        assert!(h.inventory.allocated("lab").is_empty());

        h.source.fail_persist(false);
        h.reconciler.apply_floating_ip(&fip).await.unwrap();
        assert_eq!(h.inventory.allocated("lab"), vec![ip("10.0.0.1")]);
    }

    #[tokio::test]
    async fn test_consecutive_updates_keep_one_record() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();

        for address in ["10.0.0.5", "10.0.0.6", "10.0.0.7"] {
            let fip = create_test_fip("ns", "vip", "guest", "lab", Some(address));
            h.reconciler.apply_floating_ip(&fip).await.unwrap();
        }

        let snapshot = h.inventory.snapshot();
        assert_eq!(snapshot.fips().len(), 1);
        assert_eq!(snapshot.fips()[0].address, Some(ip("10.0.0.7")));
        assert_eq!(h.inventory.allocated("lab"), vec![ip("10.0.0.7")]);
        assert!(h.source.persisted().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_fips_leave_state_untouched() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();

        let missing = create_test_fip("ns", "vip", "", "lab", None);
        assert!(matches!(
            h.reconciler.apply_floating_ip(&missing).await,
            Err(ControllerError::Record(RecordError::MissingCorrelation { .. }))
        ));

        let outside = create_test_fip("ns", "vip", "guest", "lab", Some("192.168.1.1"));
        assert!(matches!(
            h.reconciler.apply_floating_ip(&outside).await,
            Err(ControllerError::Ipam(IpamError::AddressOutOfRange { .. }))
        ));

        assert!(h.inventory.snapshot().fips().is_empty());
        assert!(h.inventory.allocated("lab").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_update_releases_previous_record() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();
        let fip = create_test_fip("ns", "vip", "guest", "lab", Some("10.0.0.9"));
        h.reconciler.apply_floating_ip(&fip).await.unwrap();

        // fiprange annotation cleared
        let broken = create_test_fip("ns", "vip", "guest", "", Some("10.0.0.9"));
        assert!(matches!(
            h.reconciler.apply_floating_ip(&broken).await,
            Err(ControllerError::Record(RecordError::MissingCorrelation { .. }))
        ));
        assert!(h.inventory.fip(&FipKey::new("ns", "vip")).is_none());
        assert!(h.inventory.allocated("lab").is_empty());
        assert_eq!(h.metrics.pending_cleanup(), 0);

        // fixing the object claims the address again
        h.reconciler.apply_floating_ip(&fip).await.unwrap();
        assert_eq!(h.inventory.allocated("lab"), vec![ip("10.0.0.9")]);
    }

    #[tokio::test]
    async fn test_update_keeps_guest_metrics() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();
        let fip = create_test_fip("ns", "vip", "guest", "lab", Some("10.0.0.9"));
        h.reconciler.apply_floating_ip(&fip).await.unwrap();
        h.metrics.set_guest_status("guest", "hv-1", true);

        let mut refreshed = fip.clone();
        refreshed
            .annotations_mut()
            .insert(annotations::UPDATE_CONFIG_MAP.to_string(), "true".to_string());
        h.reconciler.apply_floating_ip(&refreshed).await.unwrap();
        assert!(h.inventory.fip(&FipKey::new("ns", "vip")).unwrap().force_refresh);
        assert_eq!(h.metrics.pending_cleanup(), 0);

        assert_eq!(h.metrics.cleanup(), Some(0));
        assert!(h.metrics.render().unwrap().contains(
            r#"kubefipoperator_guestcluster_status{guestclustername="guest",harvesterclustername="hv-1"} 1"#
        ));
    }

    #[tokio::test]
    async fn test_delete_fip_releases_and_queues_cleanup() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();
        let fip = create_test_fip("ns", "vip", "guest", "lab", Some("10.0.0.9"));
        h.reconciler.apply_floating_ip(&fip).await.unwrap();

        h.reconciler.delete_floating_ip(&fip).await.unwrap();
        assert!(h.inventory.allocated("lab").is_empty());
        assert_eq!(h.metrics.pending_cleanup(), 1);

        // a second delete finds nothing to remove
        assert!(h.reconciler.delete_floating_ip(&fip).await.is_err());
    }

    #[tokio::test]
    async fn test_range_update_keeps_reservations() {
        let h = harness();
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();
        let fip = create_test_fip("ns", "vip", "guest", "lab", Some("10.0.0.9"));
        h.reconciler.apply_floating_ip(&fip).await.unwrap();

        // unchanged apply is ignored
        h.reconciler
            .apply_range(&create_test_range("lab", Some("10.0.0.0/24")))
            .await
            .unwrap();
        assert_eq!(h.inventory.allocated("lab"), vec![ip("10.0.0.9")]);

        h.reconciler
            .apply_range(&create_test_range_for("lab", "10.0.0.0/23", "hv-1", None))
            .await
            .unwrap();
        assert_eq!(h.inventory.usage("lab"), Some((510, 1)));
        assert_eq!(
            h.inventory.range("lab").and_then(|r| r.harvester_cluster),
            Some("hv-1".to_string())
        );

        // an invalid update drops the old range and reports the error
        assert!(
            h.reconciler
                .apply_range(&create_test_range("lab", Some("bogus")))
                .await
                .is_err()
        );
        assert!(h.inventory.range("lab").is_none());
    }

    #[tokio::test]
    async fn test_seed_claims_requested_addresses_first() {
        let h = harness();
        h.source.add_range(create_test_range("small", Some("10.0.1.0/30")));
        h.source.add_range(create_test_range("lab", Some("10.0.0.0/24")));
        h.source.add_range(create_test_range("broken", None));
        h.source.add_fip(create_test_fip("ns", "new", "guest-a", "lab", None));
        h.source.add_fip(create_test_fip("ns", "old", "guest-b", "lab", Some("10.0.0.1")));

        let ranges = h.source.list_ranges().await.unwrap();
        let fips = h.source.list_floating_ips().await.unwrap();
        let report = h.reconciler.seed(ranges, fips).await;
        assert_eq!(
            report,
            SeedReport {
                ranges: 2,
                fips: 2,
                failed: 1
            }
        );
        assert_eq!(
            h.inventory.fip(&FipKey::new("ns", "old")).and_then(|r| r.address),
            Some(ip("10.0.0.1"))
        );
        assert_eq!(
            h.inventory.fip(&FipKey::new("ns", "new")).and_then(|r| r.address),
            Some(ip("10.0.0.2"))
        );
        assert_eq!(h.source.persisted(), vec![(FipKey::new("ns", "new"), ip("10.0.0.2"))]);
        assert_eq!(h.inventory.usage("small"), Some((2, 0)));
    }
}
