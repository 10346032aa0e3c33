//! Integration tests for the management-cluster client
//!
//! These tests require a Rancher management cluster reachable through the
//! default kubeconfig. Set GUEST_CLUSTER to the name of a provisioned guest
//! cluster to run them.

use guest_client::{GuestClient, GuestClusterTrait, ManagementClient, ManagementClusterTrait};

async fn management() -> ManagementClient {
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create kube client");
    ManagementClient::new(client)
}

#[tokio::test]
#[ignore] // Requires a Rancher management cluster
async fn test_lookup_guest_cluster() {
    let name = std::env::var("GUEST_CLUSTER").expect("GUEST_CLUSTER environment variable must be set");
    let mgmt = management().await;

    let cluster = mgmt
        .get_guest_cluster(&name)
        .await
        .expect("Failed to query cluster registry")
        .expect("Guest cluster not found");
    let namespace = cluster.namespace.clone().expect("Cluster has no management namespace");

    let by_namespace = mgmt
        .find_guest_cluster_by_namespace(&namespace)
        .await
        .expect("Failed to list clusters");
    assert_eq!(by_namespace.map(|c| c.name), Some(name));

    let provider = mgmt.provider_cluster_name(&cluster).await.expect("Failed to resolve provider");
    println!("Provider cluster: {provider:?}");
}

#[tokio::test]
#[ignore] // Requires a Rancher management cluster
async fn test_probe_guest_cluster() {
    let name = std::env::var("GUEST_CLUSTER").expect("GUEST_CLUSTER environment variable must be set");
    let mgmt = management().await;

    let kubeconfig = mgmt.guest_kubeconfig(&name).await.expect("Failed to fetch kubeconfig");
    match GuestClient::new().probe(&kubeconfig).await {
        Ok(()) => println!("Guest cluster {name} reachable"),
        Err(e) if e.is_provisioning() => println!("Guest cluster {name} still provisioning"),
        Err(e) => panic!("Probe failed: {e}"),
    }
}

#[cfg(feature = "test-util")]
mod mocks {
    use guest_client::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[tokio::test]
    async fn test_mock_registry_roundtrip() {
        let mgmt = MockManagementCluster::new();
        mgmt.add_cluster("guest-a", "c-m-aaaa");
        mgmt.set_provider_cluster_name("guest-a", "harvester-1");

        let found = mgmt.find_guest_cluster_by_namespace("c-m-aaaa").await.unwrap().unwrap();
        assert_eq!(found.name, "guest-a");
        assert_eq!(
            mgmt.provider_cluster_name(&found).await.unwrap().as_deref(),
            Some("harvester-1")
        );

        mgmt.drop_kubeconfig("guest-a");
        assert!(matches!(
            mgmt.guest_kubeconfig("guest-a").await,
            Err(GuestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_guest_config_maps() {
        let guests = MockGuestCluster::new();
        let kc = GuestKubeconfig::new("guest-a", "");
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("kubevip".to_string()),
                namespace: Some("kube-system".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(guests.replace_config_map(&kc, &cm).await.is_err());
        guests.create_config_map(&kc, &cm).await.unwrap();
        assert!(guests.create_config_map(&kc, &cm).await.is_err());
        assert!(guests.get_config_map(&kc, "kube-system", "kubevip").await.unwrap().is_some());

        guests.set_probe("guest-a", ProbeOutcome::Provisioning);
        assert!(guests.probe(&kc).await.unwrap_err().is_provisioning());
    }
}
