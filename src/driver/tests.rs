//! Unit tests for the provisioning state machine and lifecycle controller.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::config::ConfigError;
use crate::remote::{InstanceAction, RemoteError};
use crate::status::InstanceStatus;
use crate::test_support::{
    FAKE_INSTANCE_ID, FAKE_PRIVATE_IP, FAKE_PUBLIC_IP, FakeRemoteClient, RemoteCall, valid_config,
};

fn instant(max_attempts: u32) -> WaitPolicy {
    WaitPolicy::new(max_attempts, Duration::ZERO)
}

fn rejected(message: &str) -> RemoteError {
    RemoteError::Rejected {
        code: 8039,
        message: message.to_owned(),
    }
}

#[fixture]
fn client() -> FakeRemoteClient {
    FakeRemoteClient::new()
}

fn driver(client: &FakeRemoteClient) -> Driver<FakeRemoteClient> {
    Driver::new("dev", valid_config(), client.clone()).with_wait_policy(instant(5))
}

fn provisioned(client: &FakeRemoteClient) -> Driver<FakeRemoteClient> {
    let state = DriverState {
        machine_name: String::from("dev"),
        region: String::from("cn-north-03"),
        instance_id: FAKE_INSTANCE_ID.to_owned(),
        ip_address: Some(FAKE_PUBLIC_IP.to_owned()),
        ..DriverState::default()
    };
    Driver::restore(state, valid_config(), client.clone())
}

#[rstest]
#[tokio::test]
async fn create_rejects_missing_password_without_remote_calls(client: FakeRemoteClient) {
    let mut config = valid_config();
    config.password = crate::config::Secret::new("");
    let mut driver = Driver::new("dev", config, client.clone());

    let err = driver.create().await.expect_err("create should fail");

    assert!(
        matches!(err, DriverError::Configuration(ConfigError::MissingField(ref m)) if m.contains("password")),
        "unexpected error: {err}"
    );
    assert_eq!(client.call_count(), 0);
    assert_eq!(driver.instance_id(), None);
}

#[rstest]
#[tokio::test]
async fn create_waits_for_running_then_records_network(client: FakeRemoteClient) {
    client.push_state("Initializing");
    client.push_state("Starting");
    client.push_state("Running");
    let mut driver = driver(&client);

    driver.create().await.expect("create should succeed");

    assert_eq!(driver.instance_id(), Some(FAKE_INSTANCE_ID));
    assert_eq!(driver.get_ip().ok().as_deref(), Some(FAKE_PUBLIC_IP));
    assert_eq!(
        driver.network().map(|network| network.security_group_id),
        Some(42)
    );
    assert!(driver.key_pair().is_some());
    assert_eq!(
        client.calls(),
        vec![
            RemoteCall::CreateKeyPair,
            RemoteCall::CreateInstance,
            RemoteCall::Describe(FAKE_INSTANCE_ID.to_owned()),
            RemoteCall::Describe(FAKE_INSTANCE_ID.to_owned()),
            RemoteCall::Describe(FAKE_INSTANCE_ID.to_owned()),
            RemoteCall::CreateNetwork(FAKE_INSTANCE_ID.to_owned()),
            RemoteCall::UploadKeyPair(FAKE_PUBLIC_IP.to_owned()),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn create_uses_private_ip_when_restricted(client: FakeRemoteClient) {
    let mut config = valid_config();
    config.private_ip_only = true;
    let mut driver = Driver::new("dev", config, client.clone()).with_wait_policy(instant(1));

    driver.create().await.expect("create should succeed");

    assert_eq!(driver.get_ip().ok().as_deref(), Some(FAKE_PRIVATE_IP));
    assert!(client.calls().contains(&RemoteCall::UploadKeyPair(FAKE_PRIVATE_IP.to_owned())));
}

#[rstest]
#[tokio::test]
async fn create_times_out_after_policy_attempts(client: FakeRemoteClient) {
    client.always_state("Starting");
    let mut driver = Driver::new("dev", valid_config(), client.clone()).with_wait_policy(instant(3));

    let err = driver.create().await.expect_err("create should time out");

    assert_eq!(
        err,
        DriverError::ProvisioningTimeout {
            instance_id: FAKE_INSTANCE_ID.to_owned(),
            attempts: 3,
            last_status: InstanceStatus::Starting,
        }
    );
    assert_eq!(
        client.count_calls(|call| matches!(call, RemoteCall::Describe(_))),
        3
    );
    assert_eq!(
        client.count_calls(|call| matches!(call, RemoteCall::CreateNetwork(_))),
        0
    );
    assert_eq!(driver.instance_id(), Some(FAKE_INSTANCE_ID));
}

#[rstest]
#[tokio::test]
async fn install_failure_keeps_polling_until_timeout(client: FakeRemoteClient) {
    client.always_state("Install Fail");
    let mut driver = Driver::new("dev", valid_config(), client.clone()).with_wait_policy(instant(2));

    let err = driver.create().await.expect_err("create should time out");

    assert!(
        matches!(
            err,
            DriverError::ProvisioningTimeout {
                last_status: InstanceStatus::Error,
                attempts: 2,
                ..
            }
        ),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn describe_failure_during_wait_aborts_provisioning(client: FakeRemoteClient) {
    client.push_state("Starting");
    client.push_describe_error(RemoteError::Network {
        message: String::from("connection reset"),
    });
    let mut driver = driver(&client);

    let err = driver.create().await.expect_err("create should fail");

    assert!(
        matches!(err, DriverError::RemoteProvider { verb: "poll status of", .. }),
        "unexpected error: {err}"
    );
    assert_eq!(
        client.count_calls(|call| matches!(call, RemoteCall::Describe(_))),
        2
    );
}

#[rstest]
#[tokio::test]
async fn key_pair_failure_stops_before_instance_creation(client: FakeRemoteClient) {
    client.fail_key_pair(RemoteError::Command {
        program: String::from("ssh-keygen"),
        message: String::from("exit status 1"),
    });
    let mut driver = driver(&client);

    let err = driver.create().await.expect_err("create should fail");

    assert!(matches!(err, DriverError::KeyPair(_)), "unexpected error: {err}");
    assert_eq!(client.calls(), vec![RemoteCall::CreateKeyPair]);
    assert_eq!(driver.instance_id(), None);
}

#[rstest]
#[tokio::test]
async fn instance_create_failure_records_nothing(client: FakeRemoteClient) {
    client.fail_instance_create(rejected("image not available"));
    let mut driver = driver(&client);

    let err = driver.create().await.expect_err("create should fail");

    assert!(
        err.to_string().starts_with("create UHost failed:"),
        "unexpected error: {err}"
    );
    assert_eq!(driver.instance_id(), None);
}

#[rstest]
#[tokio::test]
async fn network_failure_leaves_instance_recorded(client: FakeRemoteClient) {
    client.fail_network(rejected("quota exceeded"));
    let mut driver = driver(&client);

    let err = driver.create().await.expect_err("create should fail");

    assert!(matches!(err, DriverError::Network { .. }), "unexpected error: {err}");
    assert_eq!(driver.instance_id(), Some(FAKE_INSTANCE_ID));
    assert_eq!(
        client.count_calls(|call| matches!(call, RemoteCall::Action(..))),
        0,
        "no rollback by default"
    );
    assert!(driver.get_ip().is_err());
}

#[rstest]
#[tokio::test]
async fn upload_failure_is_reported_with_reason(client: FakeRemoteClient) {
    client.fail_upload(RemoteError::Command {
        program: String::from("ssh"),
        message: String::from("exit status 255: Permission denied"),
    });
    let mut driver = driver(&client);

    let err = driver.create().await.expect_err("create should fail");

    match err {
        DriverError::KeyPairUpload {
            instance_id,
            reason,
            source,
        } => {
            assert_eq!(instance_id, FAKE_INSTANCE_ID);
            assert!(reason.contains("Permission denied"), "reason: {reason}");
            assert!(source.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.get_ip().ok().as_deref(), Some(FAKE_PUBLIC_IP));
}

#[rstest]
#[tokio::test]
async fn terminate_rollback_clears_the_instance(client: FakeRemoteClient) {
    client.fail_network(rejected("quota exceeded"));
    let mut driver = driver(&client).with_rollback(Rollback::Terminate);

    let err = driver.create().await.expect_err("create should fail");

    assert!(matches!(err, DriverError::Network { .. }), "unexpected error: {err}");
    assert_eq!(driver.instance_id(), None);
    assert!(
        client
            .calls()
            .contains(&RemoteCall::Action(InstanceAction::Terminate, FAKE_INSTANCE_ID.to_owned()))
    );
}

#[rstest]
#[tokio::test]
async fn create_refuses_when_instance_already_recorded(client: FakeRemoteClient) {
    let mut driver = provisioned(&client);

    let err = driver.create().await.expect_err("create should fail");

    assert!(
        matches!(err, DriverError::InstanceExists { ref instance_id, .. } if instance_id == FAKE_INSTANCE_ID),
        "unexpected error: {err}"
    );
    assert_eq!(client.call_count(), 0);
}

#[rstest]
#[tokio::test]
async fn cancelled_token_stops_the_wait(client: FakeRemoteClient) {
    client.always_state("Starting");
    let token = CancellationToken::new();
    token.cancel();
    let mut driver = driver(&client).with_cancellation(token);

    let err = driver.create().await.expect_err("create should be cancelled");

    assert_eq!(
        err,
        DriverError::ProvisioningCancelled {
            instance_id: FAKE_INSTANCE_ID.to_owned(),
            attempts: 0,
        }
    );
    assert_eq!(
        client.count_calls(|call| matches!(call, RemoteCall::Describe(_))),
        0
    );
}

#[rstest]
#[case::start(InstanceAction::Start)]
#[case::stop(InstanceAction::Stop)]
#[case::restart(InstanceAction::Reboot)]
#[case::kill(InstanceAction::Kill)]
#[tokio::test]
async fn lifecycle_without_instance_fails_locally(#[case] action: InstanceAction) {
    let client = FakeRemoteClient::new();
    let driver = driver(&client);

    let err = match action {
        InstanceAction::Start => driver.start().await,
        InstanceAction::Stop => driver.stop().await,
        InstanceAction::Reboot => driver.restart().await,
        InstanceAction::Kill | InstanceAction::Terminate => driver.kill().await,
    }
    .expect_err("operation should fail");

    assert_eq!(
        err,
        DriverError::MissingInstance {
            machine: String::from("dev"),
            operation: action.verb(),
        }
    );
    assert_eq!(client.call_count(), 0);
}

#[rstest]
#[tokio::test]
async fn get_state_without_instance_fails_locally(client: FakeRemoteClient) {
    let driver = driver(&client);

    let err = driver.get_state().await.expect_err("get_state should fail");

    assert!(matches!(err, DriverError::MissingInstance { .. }), "unexpected error: {err}");
    assert_eq!(client.call_count(), 0);
}

#[rstest]
#[case("Running", InstanceStatus::Running)]
#[case("Rebooting", InstanceStatus::Starting)]
#[case("Stopped", InstanceStatus::Stopped)]
#[case("Install Fail", InstanceStatus::Error)]
#[case("Resizing", InstanceStatus::Unknown)]
#[tokio::test]
async fn get_state_maps_provider_state(#[case] raw: &str, #[case] expected: InstanceStatus) {
    let client = FakeRemoteClient::new();
    client.always_state(raw);
    let driver = provisioned(&client);

    let first = driver.get_state().await.expect("get_state should succeed");
    let second = driver.get_state().await.expect("get_state should succeed");

    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(client.call_count(), 2);
}

#[rstest]
#[tokio::test]
async fn lifecycle_calls_target_the_recorded_instance(client: FakeRemoteClient) {
    let driver = provisioned(&client);

    driver.start().await.expect("start");
    driver.stop().await.expect("stop");
    driver.restart().await.expect("restart");
    driver.kill().await.expect("kill");

    let id = FAKE_INSTANCE_ID.to_owned();
    assert_eq!(
        client.calls(),
        vec![
            RemoteCall::Action(InstanceAction::Start, id.clone()),
            RemoteCall::Action(InstanceAction::Stop, id.clone()),
            RemoteCall::Action(InstanceAction::Reboot, id.clone()),
            RemoteCall::Action(InstanceAction::Kill, id),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn lifecycle_failure_uses_uniform_error(client: FakeRemoteClient) {
    client.fail_actions(RemoteError::Network {
        message: String::from("connection reset"),
    });
    let driver = provisioned(&client);

    let err = driver.stop().await.expect_err("stop should fail");

    assert_eq!(
        err.to_string(),
        "cannot stop instance uhost-1: network error: connection reset"
    );
}

#[rstest]
#[tokio::test]
async fn remove_terminates_and_forgets_the_instance(client: FakeRemoteClient) {
    let mut driver = provisioned(&client);

    driver.remove().await.expect("remove should succeed");

    assert_eq!(driver.instance_id(), None);
    assert!(driver.get_ip().is_err());
    let err = driver.stop().await.expect_err("stop after remove should fail");
    assert!(matches!(err, DriverError::MissingInstance { .. }));
}

#[rstest]
#[tokio::test]
async fn failed_remove_keeps_the_instance(client: FakeRemoteClient) {
    client.fail_actions(rejected("instance is locked"));
    let mut driver = provisioned(&client);

    let err = driver.remove().await.expect_err("remove should fail");

    assert!(
        matches!(err, DriverError::RemoteProvider { verb: "remove", .. }),
        "unexpected error: {err}"
    );
    assert_eq!(driver.instance_id(), Some(FAKE_INSTANCE_ID));
}

#[rstest]
fn ip_accessors_report_missing_address(client: FakeRemoteClient) {
    let mut driver = driver(&client);
    assert_eq!(driver.get_ip(), Err(DriverError::MissingIpAddress));
    assert_eq!(driver.get_url(), Err(DriverError::MissingIpAddress));
    assert_eq!(driver.get_ssh_hostname(), Err(DriverError::MissingIpAddress));

    driver.set_ip_address("1.2.3.4");

    assert_eq!(driver.get_ip().as_deref(), Ok("1.2.3.4"));
    assert_eq!(driver.get_url().as_deref(), Ok("tcp://1.2.3.4:2376"));
    assert_eq!(driver.get_ssh_hostname().as_deref(), Ok("1.2.3.4"));
}

#[rstest]
fn host_facing_defaults(client: FakeRemoteClient) {
    let driver = driver(&client);
    assert_eq!(driver.driver_name(), "ucloud");
    assert_eq!(driver.get_ssh_username(), "root");
    assert_eq!(driver.machine_name(), "dev");
}

#[rstest]
fn state_survives_restore(client: FakeRemoteClient) {
    let mut original = driver(&client);
    original.handle.assign("uhost-9");
    original.set_ip_address("5.6.7.8");

    let restored = Driver::restore(original.state(), valid_config(), client.clone());

    assert_eq!(restored.instance_id(), Some("uhost-9"));
    assert_eq!(restored.get_ip().as_deref(), Ok("5.6.7.8"));
    assert_eq!(restored.state(), original.state());
}
