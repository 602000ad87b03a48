//! End-to-end behavior of the resilient controller against a fake projector.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pjlink_resilient::protocol::compute_auth_prefix;
use pjlink_resilient::resilience::{BreakerConfig, CircuitPhase};
use pjlink_resilient::{
    Command, ControllerConfig, DeviceClass, Error, ErrorKind, Operation, ResilientController,
    RetryPolicy,
};

use common::{answer, FakeDevice, Greeting, Reply};

const OVERALL: Duration = Duration::from_secs(5);

fn controller() -> ResilientController {
    ResilientController::new(ControllerConfig::default())
}

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(50),
        multiplier: 2.0,
        max_delay: Duration::from_secs(1),
        jitter_fraction: 0.0,
    }
}

#[tokio::test]
async fn power_on_succeeds_first_time() {
    let device = FakeDevice::answering("OK").await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.attempts_used, 1);
    assert_eq!(result.response().unwrap().payload(), "OK");
    assert_eq!(device.requests(), vec!["%1POWR 1"]);
    assert_eq!(controller.breaker_phase(&device.endpoint), Some(CircuitPhase::Closed));
}

#[tokio::test]
async fn authenticated_first_request_carries_digest() {
    let device = FakeDevice::start(
        Greeting::Auth {
            seed: "abc123",
            password: "secret",
        },
        |req| answer(req, "OK"),
    )
    .await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, Some("secret"), &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;
    assert!(result.is_success(), "{}", result.summary());

    // The second command reuses the connection and carries no digest.
    let result = controller
        .execute(
            &device.endpoint,
            Some("secret"),
            &Command::query(Operation::Power),
            &RetryPolicy::default(),
            OVERALL,
        )
        .await;
    assert!(result.is_success());

    let digest = compute_auth_prefix("abc123", "secret").unwrap();
    assert_eq!(device.requests(), vec![format!("{digest}%1POWR 1"), "%1POWR ?".to_string()]);
    assert_eq!(device.connections(), 1);
}

#[tokio::test]
async fn wrong_password_fails_without_retry() {
    let device = FakeDevice::start(
        Greeting::Auth {
            seed: "abc123",
            password: "secret",
        },
        |req| answer(req, "OK"),
    )
    .await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, Some("guess"), &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;
    assert!(matches!(result.error(), Some(Error::Authentication)));
    assert_eq!(result.attempts_used, 1);
}

#[tokio::test]
async fn pooled_session_is_not_lent_to_other_credentials() {
    let device = FakeDevice::start(
        Greeting::Auth {
            seed: "abc123",
            password: "secret",
        },
        |req| answer(req, "OK"),
    )
    .await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, Some("secret"), &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;
    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(controller.pool_stats(&device.endpoint).unwrap().idle, 1);

    let result = controller
        .execute(&device.endpoint, Some("guess"), &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;
    assert!(matches!(result.error(), Some(Error::Authentication)), "{}", result.summary());
    assert_eq!(result.attempts_used, 1);

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::AuthenticationRequired));

    // The right password opens a fresh authenticated session; every caller
    // above got its own connection.
    let result = controller
        .execute(&device.endpoint, Some("secret"), &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;
    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(device.connections(), 4);
}

#[tokio::test]
async fn missing_password_is_terminal() {
    let device = FakeDevice::start(
        Greeting::Auth {
            seed: "abc123",
            password: "secret",
        },
        |req| answer(req, "OK"),
    )
    .await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &RetryPolicy::default(), OVERALL)
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::AuthenticationRequired));
    assert_eq!(result.attempts_used, 1);
    assert_eq!(controller.pool_stats(&device.endpoint).unwrap().total, 0);
}

#[tokio::test]
async fn silent_device_exhausts_attempts_with_growing_delays() {
    let device = FakeDevice::start(Greeting::NoAuth, |_| Reply::Hang).await;
    let controller = ResilientController::new(ControllerConfig {
        read_timeout: Duration::from_millis(150),
        ..ControllerConfig::default()
    });

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &fast_retries(3), OVERALL)
        .await;

    assert!(matches!(result.error(), Some(Error::ReadTimeout(_))), "{:?}", result.error());
    assert_eq!(result.attempts_used, 3);
    // Each timed-out connection is retired, so every attempt reconnects.
    assert_eq!(device.connections(), 3);
    // Three read timeouts plus 50ms and 100ms of backoff.
    assert!(result.total_elapsed >= Duration::from_millis(600), "{:?}", result.total_elapsed);
    // Each gap is a read timeout plus the backoff before the next attempt.
    let gaps = device.request_gaps();
    assert_eq!(gaps.len(), 2);
    assert!(gaps[0] >= Duration::from_millis(200), "{gaps:?}");
    assert!(gaps[1] > gaps[0], "{gaps:?}");
    assert!(result.total_elapsed < OVERALL);
}

#[tokio::test]
async fn erra_response_is_not_retried() {
    let device = FakeDevice::answering("ERRA").await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &fast_retries(3), OVERALL)
        .await;

    assert!(matches!(result.error(), Some(Error::Authentication)));
    assert_eq!(result.attempts_used, 1);
    assert_eq!(device.requests().len(), 1);
    assert!(result.summary().contains("check password"));
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_skips_network() {
    let device = FakeDevice::start(Greeting::NoAuth, |_| Reply::Close).await;
    let controller = ResilientController::new(ControllerConfig {
        breaker: BreakerConfig {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        },
        ..ControllerConfig::default()
    });
    let policy = RetryPolicy::no_retry();

    for _ in 0..5 {
        let result = controller
            .execute(&device.endpoint, None, &Command::power_on(), &policy, OVERALL)
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ConnectionReset));
    }
    assert_eq!(controller.breaker_phase(&device.endpoint), Some(CircuitPhase::Open));
    assert_eq!(device.connections(), 5);

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &policy, OVERALL)
        .await;
    assert!(matches!(result.error(), Some(Error::CircuitOpen { .. })));
    assert_eq!(result.attempts_used, 0);
    assert_eq!(device.connections(), 5);
}

#[tokio::test]
async fn class2_command_falls_back_to_class1() {
    // A Class 1 device answers every request in class 1.
    let device = FakeDevice::start(Greeting::NoAuth, |req| {
        Reply::Line(format!("%1{}=OK", req.operation))
    })
    .await;
    let controller = controller();
    let cmd = Command::set_at(Operation::Input, "31", DeviceClass::Two).unwrap();

    let result = controller
        .execute(&device.endpoint, None, &cmd, &RetryPolicy::default(), OVERALL)
        .await;
    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.attempts_used, 2);
    assert!(controller.is_class1_only(&device.endpoint));

    let result = controller
        .execute(&device.endpoint, None, &cmd, &RetryPolicy::default(), OVERALL)
        .await;
    assert!(result.is_success());
    assert_eq!(result.attempts_used, 1);

    assert_eq!(device.requests(), vec!["%2INPT 31", "%1INPT 31", "%1INPT 31"]);
    // The mismatch did not poison the connection.
    assert_eq!(device.connections(), 1);
}

#[tokio::test]
async fn busy_device_is_retried_until_ready() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    let device = FakeDevice::start(Greeting::NoAuth, move |req| {
        if seen.fetch_add(1, Ordering::SeqCst) < 2 {
            answer(req, "ERR3")
        } else {
            answer(req, "1")
        }
    })
    .await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, None, &Command::query(Operation::Power), &fast_retries(3), OVERALL)
        .await;
    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.attempts_used, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // ERR3 leaves the connection usable.
    assert_eq!(device.connections(), 1);
}

#[tokio::test]
async fn rejected_parameter_is_terminal() {
    let device = FakeDevice::answering("ERR2").await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, None, &Command::raw("INPT", "99", DeviceClass::One), &fast_retries(3), OVERALL)
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::DeviceRejected));
    assert_eq!(result.attempts_used, 1);
    let stats = controller.pool_stats(&device.endpoint).unwrap();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn unreachable_device_is_transient() {
    let endpoint = common::closed_endpoint().await;
    let controller = controller();

    let result = controller
        .execute(&endpoint, None, &Command::power_on(), &fast_retries(2), OVERALL)
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Connect));
    assert_eq!(result.attempts_used, 2);
    assert_eq!(controller.breaker_snapshot(&endpoint).unwrap().consecutive_failures, 2);
}

#[tokio::test]
async fn overall_timeout_cuts_retries_short() {
    let device = FakeDevice::start(Greeting::NoAuth, |_| Reply::Hang).await;
    let controller = controller();

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &fast_retries(5), Duration::from_millis(300))
        .await;
    assert!(matches!(result.error(), Some(Error::OperationTimeout(_))), "{:?}", result.error());
    assert_eq!(result.attempts_used, 1);
    assert!(result.total_elapsed < Duration::from_secs(2));
    // The hung lease was retired, not leaked.
    let stats = controller.pool_stats(&device.endpoint).unwrap();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total, 0);
}

#[tokio::test]
async fn cancellation_releases_connection_and_counts_failure() {
    let device = FakeDevice::start(Greeting::NoAuth, |_| Reply::Hang).await;
    let controller = controller();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = controller
        .execute_until(
            &device.endpoint,
            None,
            &Command::power_on(),
            &RetryPolicy::default(),
            Instant::now() + OVERALL,
            &cancel,
        )
        .await;
    assert!(matches!(result.error(), Some(Error::Cancelled)));
    assert_eq!(result.attempts_used, 1);
    assert_eq!(controller.pool_stats(&device.endpoint).unwrap().total, 0);
    assert_eq!(controller.breaker_snapshot(&device.endpoint).unwrap().consecutive_failures, 1);
}

#[tokio::test]
async fn half_open_probe_closes_circuit_on_recovery() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let device = FakeDevice::start(Greeting::NoAuth, move |req| {
        if flag.load(Ordering::SeqCst) {
            answer(req, "OK")
        } else {
            Reply::Close
        }
    })
    .await;
    let controller = ResilientController::new(ControllerConfig {
        breaker: BreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_millis(200),
        },
        ..ControllerConfig::default()
    });
    let policy = RetryPolicy::no_retry();

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &policy, OVERALL)
        .await;
    assert!(!result.is_success());
    assert_eq!(controller.breaker_phase(&device.endpoint), Some(CircuitPhase::Open));

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(250)).await;

    let result = controller
        .execute(&device.endpoint, None, &Command::power_on(), &policy, OVERALL)
        .await;
    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(controller.breaker_phase(&device.endpoint), Some(CircuitPhase::Closed));
}

#[tokio::test]
async fn endpoints_are_isolated() {
    let good = FakeDevice::answering("OK").await;
    let bad = FakeDevice::start(Greeting::NoAuth, |_| Reply::Close).await;
    let controller = ResilientController::new(ControllerConfig {
        breaker: BreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_secs(30),
        },
        ..ControllerConfig::default()
    });

    let result = controller
        .execute(&bad.endpoint, None, &Command::power_on(), &RetryPolicy::no_retry(), OVERALL)
        .await;
    assert!(!result.is_success());

    let result = controller
        .execute(&good.endpoint, None, &Command::power_on(), &RetryPolicy::no_retry(), OVERALL)
        .await;
    assert!(result.is_success());
    assert_eq!(controller.breaker_phase(&bad.endpoint), Some(CircuitPhase::Open));
    assert_eq!(controller.breaker_phase(&good.endpoint), Some(CircuitPhase::Closed));

    let mut endpoints = vec![good.endpoint.clone(), bad.endpoint.clone()];
    endpoints.sort();
    assert_eq!(controller.endpoints(), endpoints);
}
