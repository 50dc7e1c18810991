//! Tests for the UCloud client: request building, response decoding, and
//! the key pair helpers.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::api::{CreateUHostInstanceResponse, DescribeUHostInstanceResponse, classify, parse_response};
use super::keys::upload_args;
use super::*;
use crate::config::Secret;
use crate::test_support::{ScriptedRunner, valid_config};


struct KeyFixture {
    _tmp: TempDir,
    key_path: Utf8PathBuf,
    runner: ScriptedRunner,
    client: UCloudClient<ScriptedRunner>,
}

#[fixture]
fn key_fixture() -> KeyFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let key_path = Utf8PathBuf::from_path_buf(tmp.path().join("machines/dev/id_rsa"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let runner = ScriptedRunner::new();
    let client = UCloudClient::with_runner(Credentials::new("pub", "priv"), runner.clone());
    KeyFixture {
        _tmp: tmp,
        key_path,
        runner,
        client,
    }
}

fn config_with_key(key_path: &Utf8PathBuf) -> ProvisioningConfig {
    let mut config = valid_config();
    config.ssh_key_path = key_path.clone();
    config
}

#[test]
fn create_params_encode_password_and_sizing() {
    let mut config = valid_config();
    config.instance_name = String::from("dev");
    let params = create_instance_params(&config);

    assert_eq!(params.action(), "CreateUHostInstance");
    assert_eq!(params.get("Password"), Some("UGFzc3cwcmQh"));
    assert_eq!(params.get("LoginMode"), Some("Password"));
    assert_eq!(params.get("Region"), Some("cn-north-03"));
    assert_eq!(params.get("ImageId"), Some("uimage-5yt2b0"));
    assert_eq!(params.get("CPU"), Some("1"));
    assert_eq!(params.get("Memory"), Some("1024"));
    assert_eq!(params.get("DiskSpace"), Some("20000"));
    assert_eq!(params.get("Name"), Some("dev"));
}

#[test]
fn signed_params_carry_public_key_and_signature() {
    let signed = Params::new("DescribeUHostInstance")
        .set("Region", "cn-north-03")
        .signed(&Credentials::new("pub-key", "priv-key"));

    assert_eq!(signed.get("PublicKey").map(String::as_str), Some("pub-key"));
    let signature = signed
        .get("Signature")
        .unwrap_or_else(|| panic!("signature missing"));
    assert_eq!(signature.len(), 40);
    assert!(!signed.values().any(|value| value == "priv-key"));
}

#[rstest]
#[case(InstanceAction::Start, "StartUHostInstance")]
#[case(InstanceAction::Stop, "StopUHostInstance")]
#[case(InstanceAction::Reboot, "RebootUHostInstance")]
#[case(InstanceAction::Kill, "PoweroffUHostInstance")]
#[case(InstanceAction::Terminate, "TerminateUHostInstance")]
fn actions_map_to_api_names(#[case] action: InstanceAction, #[case] expected: &str) {
    assert_eq!(action_name(action), expected);
}

#[test]
fn parse_response_decodes_payload() {
    let body = json!({
        "RetCode": 0,
        "Action": "DescribeUHostInstanceResponse",
        "UHostSet": [{
            "State": "Running",
            "IPSet": [
                {"Type": "Private", "IP": "10.9.0.4"},
                {"Type": "Bgp", "IP": "106.75.10.1"}
            ]
        }]
    });

    let response: DescribeUHostInstanceResponse =
        parse_response("DescribeUHostInstance", body).unwrap_or_else(|err| panic!("{err}"));

    let instance = response
        .uhost_set
        .first()
        .unwrap_or_else(|| panic!("instance missing"));
    assert_eq!(instance.state, "Running");
    assert_eq!(instance.address("Private").as_deref(), Some("10.9.0.4"));
    assert_eq!(instance.public_address().as_deref(), Some("106.75.10.1"));
}

#[test]
fn parse_response_turns_ret_code_into_error() {
    let body = json!({"RetCode": 8039, "Message": "Params [ImageId] not available"});

    let result: Result<CreateUHostInstanceResponse, _> =
        parse_response("CreateUHostInstance", body);

    assert_eq!(
        result.err(),
        Some(RemoteError::Rejected {
            code: 8039,
            message: String::from("Params [ImageId] not available"),
        })
    );
}

#[test]
fn parse_response_rejects_malformed_body() {
    let result: Result<CreateUHostInstanceResponse, _> =
        parse_response("CreateUHostInstance", json!({"Unexpected": true}));
    assert!(
        matches!(result, Err(RemoteError::Network { ref message }) if message.contains("CreateUHostInstance")),
        "unexpected result: {result:?}"
    );
}

#[rstest]
#[case(171, "Signature VerifyAC Error", "auth")]
#[case(172, "Missing PublicKey", "auth")]
#[case(8039, "UHost [uhost-x] not exist", "missing")]
#[case(230, "Resource not found", "missing")]
#[case(8040, "Quota exceeded", "rejected")]
fn classify_maps_codes_and_messages(
    #[case] code: i64,
    #[case] message: &str,
    #[case] expected: &str,
) {
    let kind = match classify(code, message.to_owned()) {
        RemoteError::Authentication { .. } => "auth",
        RemoteError::NotFound { .. } => "missing",
        RemoteError::Rejected { .. } => "rejected",
        other => panic!("unexpected classification: {other}"),
    };
    assert_eq!(kind, expected);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let client =
        UCloudClient::new(Credentials::new("pub", "priv")).with_base_url("http://127.0.0.1:9/");

    let err = client
        .instance_action(InstanceAction::Stop, "cn-north-03", "uhost-1")
        .await
        .expect_err("nothing listens on the discard port");

    assert!(matches!(err, RemoteError::Network { .. }), "unexpected error: {err}");
}

#[rstest]
#[tokio::test]
async fn configured_material_skips_keygen(key_fixture: KeyFixture) {
    let mut config = config_with_key(&key_fixture.key_path);
    config.key_pair_material = Some(String::from("ssh-rsa AAAAinjected"));

    let record = key_fixture
        .client
        .create_key_pair(&config)
        .await
        .unwrap_or_else(|err| panic!("key pair: {err}"));

    assert_eq!(record.public_key_material, "ssh-rsa AAAAinjected");
    assert_eq!(record.private_key_ref, key_fixture.key_path);
    assert!(key_fixture.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn keygen_writes_key_at_configured_path(key_fixture: KeyFixture) {
    key_fixture.runner.push_success_with(|args: &[OsString]| {
        let private = args
            .last()
            .unwrap_or_else(|| panic!("key path argument missing"))
            .to_string_lossy()
            .into_owned();
        std::fs::write(format!("{private}.pub"), "ssh-rsa AAAAgenerated dev\n")
            .unwrap_or_else(|err| panic!("write public key: {err}"));
    });
    let config = config_with_key(&key_fixture.key_path);

    let record = key_fixture
        .client
        .create_key_pair(&config)
        .await
        .unwrap_or_else(|err| panic!("key pair: {err}"));

    assert_eq!(record.public_key_material, "ssh-rsa AAAAgenerated dev");
    let invocations = key_fixture.runner.invocations();
    let [invocation] = invocations.as_slice() else {
        panic!("expected one invocation, got {invocations:?}");
    };
    assert_eq!(
        invocation.command_string(),
        format!("ssh-keygen -t rsa -b 2048 -N  -q -f {}", key_fixture.key_path)
    );
}

#[rstest]
#[tokio::test]
async fn existing_key_is_reused(key_fixture: KeyFixture) {
    let parent = key_fixture
        .key_path
        .parent()
        .unwrap_or_else(|| panic!("key path has no parent"));
    std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(format!("{}.pub", key_fixture.key_path), "ssh-rsa AAAAexisting\n")
        .unwrap_or_else(|err| panic!("write: {err}"));
    let config = config_with_key(&key_fixture.key_path);

    let record = key_fixture
        .client
        .create_key_pair(&config)
        .await
        .unwrap_or_else(|err| panic!("key pair: {err}"));

    assert_eq!(record.public_key_material, "ssh-rsa AAAAexisting");
    assert!(key_fixture.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn keygen_failure_is_a_command_error(key_fixture: KeyFixture) {
    key_fixture.runner.push_failure(1, "Saving key failed");
    let config = config_with_key(&key_fixture.key_path);

    let err = key_fixture
        .client
        .create_key_pair(&config)
        .await
        .expect_err("keygen should fail");

    assert_eq!(
        err,
        RemoteError::Command {
            program: String::from("ssh-keygen"),
            message: String::from("exit status 1: Saving key failed"),
        }
    );
}

fn target() -> SshTarget {
    SshTarget {
        host: String::from("106.75.1.2"),
        port: 22,
        user: String::from("root"),
        password: Secret::new("Passw0rd!"),
    }
}

fn record() -> KeyPairRecord {
    KeyPairRecord {
        public_key_material: String::from("ssh-rsa AAAAkey dev"),
        private_key_ref: Utf8PathBuf::from("/tmp/id_rsa"),
    }
}

#[test]
fn upload_args_quote_the_public_key() {
    let args: Vec<String> = upload_args(&target(), "ssh-rsa AAAAkey dev")
        .into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    assert_eq!(args.first().map(String::as_str), Some("-e"));
    assert!(args.contains(&String::from("root@106.75.1.2")));
    assert!(args.contains(&String::from("StrictHostKeyChecking=no")));
    let remote = args.last().unwrap_or_else(|| panic!("remote command missing"));
    assert!(
        remote.contains("echo 'ssh-rsa AAAAkey dev' >> ~/.ssh/authorized_keys"),
        "remote command: {remote}"
    );
}

#[rstest]
#[tokio::test]
async fn upload_passes_password_through_environment(key_fixture: KeyFixture) {
    key_fixture.runner.push_success();
    let handle = InstanceHandle::new("cn-north-03");

    key_fixture
        .client
        .upload_key_pair(&handle, &target(), &record())
        .await
        .unwrap_or_else(|err| panic!("upload: {err}"));

    let invocations = key_fixture.runner.invocations();
    let [invocation] = invocations.as_slice() else {
        panic!("expected one invocation, got {invocations:?}");
    };
    assert_eq!(invocation.program, "sshpass");
    assert_eq!(
        invocation.envs,
        vec![(String::from("SSHPASS"), String::from("Passw0rd!"))]
    );
    assert!(
        !invocation.command_string().contains("Passw0rd!"),
        "password leaked into argv"
    );
}

#[rstest]
#[tokio::test]
async fn upload_failure_reports_ssh_exit(key_fixture: KeyFixture) {
    key_fixture.runner.push_failure(255, "Permission denied");
    let handle = InstanceHandle::new("cn-north-03");

    let err = key_fixture
        .client
        .upload_key_pair(&handle, &target(), &record())
        .await
        .expect_err("upload should fail");

    assert_eq!(
        err.to_string(),
        "ssh failed: exit status 255: Permission denied"
    );
}

#[test]
fn factory_applies_wait_policy_and_machine_name() {
    let config = UCloudConfig {
        public_key: String::from("pub"),
        private_key: String::from("priv"),
        region: String::from("cn-north-03"),
        image_id: String::from("uimage-5yt2b0"),
        user_password: String::from("secret"),
        ssh_user: String::from("root"),
        ssh_port: 22,
        private_address_only: false,
        security_group: String::from("docker-machine"),
        cpu: 1,
        memory: 1024,
        disk_space: 20_000,
        key_pair_material: None,
        storage_path: String::from(".ucloud-machine"),
        wait_attempts: 4,
        wait_interval_secs: 2,
    };

    let driver = ucloud_driver("dev", &config, Utf8PathBuf::from("/keys/id_rsa"))
        .unwrap_or_else(|err| panic!("factory: {err}"));

    assert_eq!(driver.machine_name(), "dev");
    assert_eq!(driver.config().instance_name, "dev");
    assert_eq!(driver.config().ssh_key_path.as_str(), "/keys/id_rsa");
    assert_eq!(
        driver.wait_policy(),
        crate::wait::WaitPolicy::new(4, std::time::Duration::from_secs(2))
    );
    assert_eq!(driver.instance_id(), None);
}
