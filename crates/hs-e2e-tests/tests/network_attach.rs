//! E2E tests for the network-attach phase.

mod helpers;

use hs_mqtt_channel::{ConnectionState, MockNetwork};

use helpers::{ENDPOINT, NodeHarness};

/// Attach keeps failing: the node stays in NetworkAttaching, polling, forever.
#[tokio::test]
async fn e2e_attach_failure_never_progresses() {
    let mut h = NodeHarness::builder()
        .network(MockNetwork::detached())
        .build();

    for _ in 0..10_000 {
        h.step().await;
    }
    assert_eq!(h.state(), ConnectionState::NetworkAttaching);
    assert_eq!(
        h.trace,
        vec![ConnectionState::Disconnected, ConnectionState::NetworkAttaching]
    );
    // One join, then status polls only: nothing connection-scoped is created.
    assert_eq!(h.network_mut().join_count(), 1);
    assert!(h.transport().opened_hosts().is_empty());
    assert!(h.transport().sent().is_empty());
    assert_eq!(h.ctx.session().stats().attempts, 1);
}

/// Attach completes after a few polls; the node then connects normally.
#[tokio::test]
async fn e2e_slow_attach_then_ready() {
    let mut h = NodeHarness::builder()
        .network(MockNetwork::attaching_after(6))
        .build();

    assert!(h.run_until(ConnectionState::Ready, 50).await);
    // Five failed polls at 500ms each.
    assert!(h.now_ms() >= 5 * 500);
    assert_eq!(h.network_mut().last_ssid(), Some("lab-wifi"));
    assert_eq!(h.transport().opened_hosts(), vec![format!("{ENDPOINT}:8883")]);
}

/// Losing the link while Ready drops the session and re-joins.
#[tokio::test]
async fn e2e_link_loss_rejoins() {
    let mut h = NodeHarness::builder().build();
    assert!(h.run_until(ConnectionState::Ready, 20).await);

    h.network_mut().set_attached(false);
    h.step().await;
    assert_eq!(h.state(), ConnectionState::Disconnected);
    h.step().await;
    assert_eq!(h.state(), ConnectionState::NetworkAttaching);
    assert_eq!(h.network_mut().join_count(), 2);

    h.network_mut().set_attached(true);
    assert!(h.run_until(ConnectionState::Ready, 20).await);
}
