//! Transport resource accounting across reconnect cycles
//!
//! Lives in its own test binary on purpose: the mock link counter is
//! process-wide, and this is the only test in this process that creates
//! links, so the counts are exact.

use elmlink::config::{AdapterConfig, MockConfig, MockScenario, RetryConfig};
use elmlink::transport::mock::MockLink;
use elmlink::{DiagnosticLink, LinkConfig, TransportConfig};

#[tokio::test]
async fn reconnect_cycles_never_hold_two_live_transports() {
    let mut config = LinkConfig::new(TransportConfig::Mock(MockConfig {
        latency_ms: 0,
        scenario: MockScenario::Healthy,
    }));
    config.adapter = AdapterConfig {
        reset_settle_ms: 1,
        command_timeout_ms: 200,
        probe_timeout_ms: 200,
        init_retries: 0,
        init_retry_delay_ms: 1,
    };
    config.retry = RetryConfig {
        max_attempts: 2,
        backoff_step_ms: 1,
    };
    let link = DiagnosticLink::new(config);

    let baseline = MockLink::live_links();

    link.connect().await.unwrap();
    assert_eq!(MockLink::live_links(), baseline + 1);

    link.disconnect(true).await;
    assert_eq!(MockLink::live_links(), baseline, "graceful disconnect releases the link");

    link.connect().await.unwrap();
    assert_eq!(MockLink::live_links(), baseline + 1);

    for _ in 0..3 {
        link.reconnect().await.unwrap();
        assert_eq!(
            MockLink::live_links(),
            baseline + 1,
            "old transport must be fully torn down before the new one exists"
        );
    }

    link.disconnect(false).await;
    assert_eq!(MockLink::live_links(), baseline, "hard disconnect releases the link");
}
