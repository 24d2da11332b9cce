//! Unit tests for orchestrator helpers.

use rstest::rstest;

use super::*;
use crate::poll::PollError;
use crate::test_support::{FakeGatewayError, GatewayCall};

#[rstest]
#[case(Operation::Create, "create")]
#[case(Operation::Reset, "reset")]
#[case(Operation::Stop, "stop")]
#[case(Operation::Teardown, "teardown")]
fn operation_names(#[case] operation: Operation, #[case] expected: &str) {
    assert_eq!(operation.to_string(), expected);
}

#[rstest]
fn default_timings_follow_provider_cadence() {
    let timings = Timings::default();
    assert_eq!(timings.image_poll, Duration::from_secs(10));
    assert_eq!(timings.instance_poll, Duration::from_secs(8));
    assert_eq!(timings.settle, Duration::from_secs(60));
}

#[rstest]
fn probe_failures_name_the_gateway_call() {
    let err = LabError::from_poll(
        PollError::Probe {
            what: String::from("instance to run"),
            source: FakeGatewayError::Injected(GatewayCall::InstanceStatus),
        },
        "instance_status",
        "lab1",
    );
    assert_eq!(
        err.to_string(),
        "instance_status failed for lab1: injected failure in InstanceStatus"
    );
}

#[rstest]
fn cancelled_polls_stay_cancelled() {
    let err = LabError::<FakeGatewayError>::from_poll(
        PollError::Cancelled {
            what: String::from("external address"),
        },
        "external_address",
        "lab1",
    );
    assert!(matches!(err, LabError::Cancelled { ref what } if what == "external address"));
}

#[rstest]
fn precondition_message_names_state() {
    let err = LabError::<FakeGatewayError>::Precondition {
        instance: String::from("lab1"),
        status: InstanceStatus::Terminated,
    };
    assert_eq!(err.to_string(), "instance lab1 is terminated; nothing to stop");
}

#[rstest]
fn failures_display_their_error_once() {
    let failure = LabFailure {
        status: Status::default(),
        error: LabError::gateway(
            "delete_instance",
            "lab1",
            FakeGatewayError::Injected(GatewayCall::DeleteInstance),
        ),
    };
    let message = "delete_instance failed for lab1: injected failure in DeleteInstance";

    assert_eq!(failure.to_string(), message);
    assert!(std::error::Error::source(&failure).is_none());
    assert_eq!(failure.error.to_string(), message);
}
