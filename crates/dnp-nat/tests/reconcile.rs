//! Reconciliation cycles against an in-memory router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeCompose, FakeGateway, FakeInventory, aggregator, binding};
use dnp_common::{PackageContainer, PortMapping, Protocol};
use dnp_nat::{Action, GatewayError, NatReconciler, ReconcilerSettings};

fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        description: "DAppNode".to_string(),
        lease: Duration::from_secs(7200),
        renew_before: Duration::from_secs(4200),
    }
}

fn fleet() -> FakeInventory {
    FakeInventory(Some(vec![
        PackageContainer::new("admin.dnp.dappnode.eth", true)
            .running_with(vec![binding(8090, Protocol::Tcp)]),
        PackageContainer::new("vpn.dnp.dappnode.eth", true)
            .running_with(vec![binding(1194, Protocol::Udp)]),
        PackageContainer::new("vpn.dnp.dappnode.eth2", true)
            .running_with(vec![binding(1194, Protocol::Udp)]),
        PackageContainer::new("geth.dnp.dappnode.eth", false)
            .running_with(vec![binding(30303, Protocol::Tcp), binding(30303, Protocol::Udp)]),
    ]))
}

fn reconciler(inventory: FakeInventory, gateway: &Arc<FakeGateway>) -> NatReconciler {
    NatReconciler::new(
        aggregator(inventory, FakeCompose::default()),
        gateway.clone(),
        settings(),
    )
}

#[tokio::test]
async fn first_cycle_opens_every_port_once() {
    let gateway = Arc::new(FakeGateway::default());
    let report = reconciler(fleet(), &gateway).reconcile().await.unwrap();

    assert_eq!(
        report.added,
        vec![
            PortMapping::tcp(8090),
            PortMapping::udp(1194),
            PortMapping::tcp(30303),
            PortMapping::udp(30303),
        ]
    );
    assert!(report.failed.is_empty());
    assert_eq!(gateway.mutations(), 4);
}

#[tokio::test]
async fn second_cycle_changes_nothing() {
    let gateway = Arc::new(FakeGateway::default());
    let reconciler = reconciler(fleet(), &gateway);

    reconciler.reconcile().await.unwrap();
    let before = gateway.mutations();
    let report = reconciler.reconcile().await.unwrap();

    assert_eq!(gateway.mutations(), before);
    assert_eq!(report.mutations(), 0);
    assert_eq!(report.unchanged.len(), 4);
}

#[tokio::test]
async fn one_failing_port_does_not_stop_the_others() {
    let gateway = Arc::new(FakeGateway {
        rejected: [PortMapping::udp(1194)].into_iter().collect(),
        ..FakeGateway::default()
    });
    let report = reconciler(fleet(), &gateway).reconcile().await.unwrap();

    assert_eq!(report.added.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].action, Action::Add);
    assert_eq!(report.failed[0].mapping, PortMapping::udp(1194));
    assert!(!gateway.mapped().contains(&PortMapping::udp(1194)));
}

#[tokio::test]
async fn unreachable_router_is_an_error_and_nothing_changes() {
    let gateway = Arc::new(FakeGateway {
        unreachable: true,
        ..FakeGateway::default()
    });
    let result = reconciler(fleet(), &gateway).reconcile().await;

    assert!(matches!(result, Err(GatewayError::Unreachable(_))));
    assert_eq!(gateway.mutations(), 0);
}

#[tokio::test]
async fn stale_own_entries_close_and_foreign_ones_stay() {
    let gateway = Arc::new(FakeGateway::default());
    gateway.seed(PortMapping::tcp(9999), "DAppNode", Some(Duration::from_secs(7000)));
    gateway.seed(PortMapping::udp(51820), "wireguard", None);

    let report = reconciler(fleet(), &gateway).reconcile().await.unwrap();

    assert_eq!(report.removed, vec![PortMapping::tcp(9999)]);
    let mapped = gateway.mapped();
    assert!(!mapped.contains(&PortMapping::tcp(9999)));
    assert!(mapped.contains(&PortMapping::udp(51820)));
}

#[tokio::test]
async fn entries_left_on_an_old_lan_address_move_to_the_current_one() {
    let gateway = Arc::new(FakeGateway::default());
    gateway.seed_to(PortMapping::tcp(8090), "192.168.1.99", "DAppNode", None);
    let reconciler = reconciler(fleet(), &gateway);

    let report = reconciler.reconcile().await.unwrap();
    assert!(report.added.contains(&PortMapping::tcp(8090)));
    assert!(!report.unchanged.contains(&PortMapping::tcp(8090)));
    assert!(report.removed.is_empty());
    assert!(report.failed.is_empty());
    assert!(gateway.clients().iter().all(|c| c.starts_with("192.168.1.42:")));

    let before = gateway.mutations();
    let again = reconciler.reconcile().await.unwrap();
    assert_eq!(gateway.mutations(), before);
    assert!(again.unchanged.contains(&PortMapping::tcp(8090)));
}

#[tokio::test]
async fn rejected_remove_does_not_stop_other_changes() {
    let gateway = Arc::new(FakeGateway {
        rejected: [PortMapping::tcp(9999)].into_iter().collect(),
        ..FakeGateway::default()
    });
    gateway.seed(PortMapping::tcp(9999), "DAppNode", Some(Duration::from_secs(7000)));
    gateway.seed(PortMapping::udp(9998), "DAppNode", Some(Duration::from_secs(7000)));

    let report = reconciler(fleet(), &gateway).reconcile().await.unwrap();

    assert_eq!(report.removed, vec![PortMapping::udp(9998)]);
    assert_eq!(report.added.len(), 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].action, Action::Remove);
    assert_eq!(report.failed[0].mapping, PortMapping::tcp(9999));
    assert!(report.failed[0].error.contains("714"));

    let mapped = gateway.mapped();
    assert!(mapped.contains(&PortMapping::tcp(9999)));
    assert!(!mapped.contains(&PortMapping::udp(9998)));
}

#[tokio::test]
async fn desired_port_held_by_someone_else_is_a_conflict() {
    let gateway = Arc::new(FakeGateway::default());
    gateway.seed(PortMapping::tcp(8090), "other-nas", None);

    let report = reconciler(fleet(), &gateway).reconcile().await.unwrap();

    assert_eq!(report.conflicts, vec![PortMapping::tcp(8090)]);
    assert!(!report.added.contains(&PortMapping::tcp(8090)));
}

#[tokio::test]
async fn expiring_leases_are_renewed() {
    let gateway = Arc::new(FakeGateway::default());
    gateway.seed(PortMapping::tcp(8090), "DAppNode", Some(Duration::from_secs(600)));

    let report = reconciler(fleet(), &gateway).reconcile().await.unwrap();

    assert_eq!(report.renewed, vec![PortMapping::tcp(8090)]);
    assert_eq!(report.added.len(), 3);
}

#[tokio::test]
async fn state_tracks_desired_and_applied() {
    let gateway = Arc::new(FakeGateway {
        rejected: [PortMapping::udp(30303)].into_iter().collect(),
        ..FakeGateway::default()
    });
    let reconciler = reconciler(fleet(), &gateway);
    reconciler.reconcile().await.unwrap();

    let state = reconciler.state();
    assert_eq!(state.desired.len(), 4);
    assert_eq!(
        state.applied,
        vec![
            PortMapping::tcp(8090),
            PortMapping::udp(1194),
            PortMapping::tcp(30303),
        ]
    );
}

#[tokio::test]
async fn inventory_outage_still_opens_defaults() {
    let gateway = Arc::new(FakeGateway::default());
    let report = reconciler(FakeInventory(None), &gateway)
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.added, dnp_nat::DEFAULT_PORTS_TO_OPEN.to_vec());
}
