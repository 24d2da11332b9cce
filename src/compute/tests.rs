//! Unit tests for request bodies and response handling.

use std::net::{IpAddr, Ipv4Addr};

use reqwest::StatusCode;
use rstest::rstest;
use serde_json::{Value, json};

use super::firewalls::{rule_deleted_from, rule_insert_from};
use super::images::image_status_from;
use super::instances::{external_address_of, instance_from};
use super::types::{FirewallBody, ImageBody, InstanceBody, InstanceResource};
use super::*;
use crate::lab::Direction;
use crate::test_support::sample_lab;

fn response(status: StatusCode, body: &str) -> ApiResponse {
    ApiResponse {
        status,
        body: body.to_owned(),
    }
}

fn settings() -> ComputeSettings {
    ComputeSettings {
        access_token: String::from("token"),
        project_id: String::from("demo-project"),
        zone: String::from("us-central1-a"),
        api_base: String::from("https://compute.example/compute/v1/"),
    }
}

fn to_value<T: serde::Serialize>(body: &T) -> Value {
    serde_json::to_value(body).unwrap_or_else(|err| panic!("serialise: {err}"))
}

#[rstest]
fn gateway_rejects_missing_token() {
    let err = ComputeGateway::new(ComputeSettings {
        access_token: String::from("  "),
        ..settings()
    })
    .err();
    assert_eq!(err, Some(ComputeError::Config(String::from("access_token"))));
}

#[rstest]
fn urls_are_scoped_to_project_and_zone() {
    let gateway = ComputeGateway::new(settings()).unwrap_or_else(|err| panic!("{err}"));
    assert_eq!(
        gateway.zone_url("instances/lab1"),
        "https://compute.example/compute/v1/projects/demo-project/zones/us-central1-a/instances/lab1"
    );
    assert_eq!(
        gateway.project_url("global/firewalls"),
        "https://compute.example/compute/v1/projects/demo-project/global/firewalls"
    );
}

#[rstest]
fn debug_output_hides_token() {
    let rendered = format!("{:?}", settings());
    assert!(!rendered.contains("\"token\""), "{rendered}");
    assert!(rendered.contains("<redacted>"));
}

#[rstest]
fn instance_body_matches_compute_schema() {
    let mut lab = sample_lab("lab1");
    lab.create_custom_image = true;
    let body = to_value(&InstanceBody::new(&lab.instance_request(), &lab.zone));

    assert_eq!(body["name"], "lab1");
    assert_eq!(body["machineType"], "zones/us-central1-a/machineTypes/c2-standard-4");
    assert_eq!(body["minCpuPlatform"], "Intel Cascade Lake");
    assert_eq!(body["canIpForward"], true);
    assert_eq!(body["tags"]["items"], json!(["http-server", "https-server", "lab1"]));

    let disk = &body["disks"][0];
    assert_eq!(disk["boot"], true);
    assert_eq!(disk["autoDelete"], true);
    assert_eq!(disk["initializeParams"]["diskName"], "lab1-root");
    assert_eq!(disk["initializeParams"]["diskSizeGb"], "10");
    assert_eq!(
        disk["initializeParams"]["diskType"],
        "zones/us-central1-a/diskTypes/pd-ssd"
    );
    assert_eq!(
        disk["initializeParams"]["sourceImage"],
        "projects/demo-project/global/images/lab-image"
    );

    let access = &body["networkInterfaces"][0]["accessConfigs"][0];
    assert_eq!(access["name"], "External NAT");
    assert_eq!(access["type"], "ONE_TO_ONE_NAT");
    assert_eq!(body["serviceAccounts"][0]["email"], "default");
    assert_eq!(body["metadata"]["items"][0]["key"], "ssh-keys");
    assert_eq!(
        body["metadata"]["items"][0]["value"],
        "lab:ssh-ed25519 AAAA test@example"
    );
}

#[rstest]
fn image_body_enables_nested_virtualisation() {
    let body = to_value(&ImageBody::from(&sample_lab("lab1").image_request()));
    assert_eq!(body["name"], "lab-image");
    assert_eq!(body["diskSizeGb"], "10");
    assert!(
        body["licenses"][0]
            .as_str()
            .is_some_and(|licence| licence.ends_with("/licenses/enable-vmx"))
    );
}

#[rstest]
#[case(Direction::Ingress, "sourceRanges", "destinationRanges")]
#[case(Direction::Egress, "destinationRanges", "sourceRanges")]
fn firewall_body_places_ranges_by_direction(
    #[case] direction: Direction,
    #[case] present: &str,
    #[case] absent: &str,
) {
    let body = to_value(&FirewallBody::from(&sample_lab("lab1").firewall_rule(direction)));
    assert_eq!(body["direction"], direction.provider_value());
    assert_eq!(body["targetTags"], json!(["lab1"]));
    assert_eq!(body["allowed"][0]["IPProtocol"], "tcp");
    assert_eq!(body["allowed"][0]["ports"], json!(["0-65535"]));
    assert_eq!(body[present], json!(["0.0.0.0/0"]));
    assert!(body.get(absent).is_none());
}

#[rstest]
#[case(StatusCode::NOT_FOUND, "", ImageStatus::Absent)]
#[case(StatusCode::OK, r#"{"status":"PENDING"}"#, ImageStatus::Pending)]
#[case(StatusCode::OK, r#"{"status":"READY"}"#, ImageStatus::Ready)]
#[case(StatusCode::OK, r#"{"status":"FAILED"}"#, ImageStatus::Failed)]
fn image_status_maps_responses(
    #[case] status: StatusCode,
    #[case] body: &str,
    #[case] expected: ImageStatus,
) {
    let actual =
        image_status_from(response(status, body)).unwrap_or_else(|err| panic!("status: {err}"));
    assert_eq!(actual, expected);
}

#[rstest]
fn api_errors_carry_provider_message() {
    let err = image_status_from(response(
        StatusCode::FORBIDDEN,
        r#"{"error":{"code":403,"message":"Required 'compute.images.get' permission"}}"#,
    ))
    .err();
    assert_eq!(
        err,
        Some(ComputeError::Api {
            operation: "image_status",
            status: 403,
            message: String::from("Required 'compute.images.get' permission"),
        })
    );
}

#[rstest]
fn malformed_success_body_is_a_decode_error() {
    let err = instance_from(response(StatusCode::OK, "not json")).err();
    assert!(matches!(err, Some(ComputeError::Decode { operation: "instance_status", .. })));
}

#[rstest]
fn missing_instance_is_absent() {
    let instance = instance_from(response(StatusCode::NOT_FOUND, r#"{"error":{"message":"gone"}}"#))
        .unwrap_or_else(|err| panic!("lookup: {err}"));
    assert!(instance.is_none());
}

#[rstest]
fn external_address_reads_last_nat_ip() {
    let instance: InstanceResource = serde_json::from_value(json!({
        "status": "RUNNING",
        "networkInterfaces": [{
            "accessConfigs": [
                {"name": "External NAT"},
                {"name": "External NAT", "natIP": "34.70.1.2"}
            ]
        }]
    }))
    .unwrap_or_else(|err| panic!("decode: {err}"));

    let address = external_address_of("lab1", &instance).unwrap_or_else(|err| panic!("{err}"));
    assert_eq!(address, Some(IpAddr::V4(Ipv4Addr::new(34, 70, 1, 2))));
}

#[rstest]
fn unassigned_address_is_none() {
    let instance: InstanceResource = serde_json::from_value(json!({"status": "PROVISIONING"}))
        .unwrap_or_else(|err| panic!("decode: {err}"));
    let address = external_address_of("lab1", &instance).unwrap_or_else(|err| panic!("{err}"));
    assert_eq!(address, None);
}

#[rstest]
fn garbage_address_is_rejected() {
    let instance: InstanceResource = serde_json::from_value(json!({
        "status": "RUNNING",
        "networkInterfaces": [{"accessConfigs": [{"natIP": "not-an-ip"}]}]
    }))
    .unwrap_or_else(|err| panic!("decode: {err}"));
    assert!(matches!(
        external_address_of("lab1", &instance),
        Err(ComputeError::InvalidAddress { .. })
    ));
}

#[rstest]
#[case(StatusCode::OK, Some(RuleInsert::Created))]
#[case(StatusCode::CONFLICT, Some(RuleInsert::AlreadyExists))]
#[case(StatusCode::INTERNAL_SERVER_ERROR, None)]
fn firewall_insert_tolerates_conflict(
    #[case] status: StatusCode,
    #[case] expected: Option<RuleInsert>,
) {
    assert_eq!(rule_insert_from(response(status, "{}")).ok(), expected);
}

#[rstest]
#[case(StatusCode::OK, Some(true))]
#[case(StatusCode::NOT_FOUND, Some(false))]
#[case(StatusCode::BAD_REQUEST, None)]
fn firewall_delete_reports_missing_rules(
    #[case] status: StatusCode,
    #[case] expected: Option<bool>,
) {
    assert_eq!(rule_deleted_from(response(status, "{}")).ok(), expected);
}
