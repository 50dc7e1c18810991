//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::config::ProvisioningConfig;
use crate::remote::{
    InstanceAction, InstanceDescription, InstanceHandle, KeyPairRecord, NetworkInfo, RemoteError,
    RemoteFuture, RemoteInstanceClient, SshTarget,
};

/// Instance id returned by [`FakeRemoteClient::create_instance`] unless
/// overridden.
pub const FAKE_INSTANCE_ID: &str = "uhost-1";
/// Private address reported by the default fake network.
pub const FAKE_PRIVATE_IP: &str = "10.0.0.2";
/// Public address reported by the default fake network.
pub const FAKE_PUBLIC_IP: &str = "106.75.1.2";

/// Builds a provisioning config that passes validation.
///
/// # Panics
///
/// Panics if the defaults stop building, which would be a bug in the
/// builder.
#[must_use]
pub fn valid_config() -> ProvisioningConfig {
    ProvisioningConfig::builder()
        .public_key("test-public-key")
        .private_key("test-private-key")
        .password("Passw0rd!")
        .build()
        .unwrap_or_else(|err| panic!("test config should build: {err}"))
}

/// A single call observed by [`FakeRemoteClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteCall {
    /// `create_key_pair`.
    CreateKeyPair,
    /// `create_instance`.
    CreateInstance,
    /// `describe_instance` for the given instance id.
    Describe(String),
    /// `instance_action` with the given action and instance id.
    Action(InstanceAction, String),
    /// `create_network` for the given instance id.
    CreateNetwork(String),
    /// `upload_key_pair` to the given host.
    UploadKeyPair(String),
}

#[derive(Debug)]
struct FakeState {
    calls: Vec<RemoteCall>,
    instance_id: String,
    states: VecDeque<Result<String, RemoteError>>,
    fallback_state: String,
    key_pair_error: Option<RemoteError>,
    create_error: Option<RemoteError>,
    network: Result<NetworkInfo, RemoteError>,
    upload_error: Option<RemoteError>,
    action_error: Option<RemoteError>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            instance_id: FAKE_INSTANCE_ID.to_owned(),
            states: VecDeque::new(),
            fallback_state: String::from("Running"),
            key_pair_error: None,
            create_error: None,
            network: Ok(NetworkInfo {
                private_ip: FAKE_PRIVATE_IP.to_owned(),
                public_ip: Some(FAKE_PUBLIC_IP.to_owned()),
                security_group_id: 42,
            }),
            upload_error: None,
            action_error: None,
        }
    }
}

/// In-memory [`RemoteInstanceClient`] with scripted responses.
///
/// Clones share state, so a test can keep one clone for assertions while a
/// driver owns another. Describe responses are served from a queue and fall
/// back to a fixed raw state once the queue is empty.
#[derive(Clone, Debug, Default)]
pub struct FakeRemoteClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemoteClient {
    /// Creates a client whose every call succeeds and whose instance is
    /// already `Running`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: RemoteCall) {
        self.lock().calls.push(call);
    }

    /// Queues a raw provider state for the next describe call.
    pub fn push_state(&self, raw_state: impl Into<String>) {
        self.lock().states.push_back(Ok(raw_state.into()));
    }

    /// Queues a failure for the next describe call.
    pub fn push_describe_error(&self, error: RemoteError) {
        self.lock().states.push_back(Err(error));
    }

    /// Sets the raw state reported once the queue is drained.
    pub fn always_state(&self, raw_state: impl Into<String>) {
        self.lock().fallback_state = raw_state.into();
    }

    /// Sets the id returned by instance creation.
    pub fn with_instance_id(&self, instance_id: impl Into<String>) {
        self.lock().instance_id = instance_id.into();
    }

    /// Sets the network returned by `create_network`.
    pub fn with_network(&self, network: NetworkInfo) {
        self.lock().network = Ok(network);
    }

    /// Makes key pair creation fail.
    pub fn fail_key_pair(&self, error: RemoteError) {
        self.lock().key_pair_error = Some(error);
    }

    /// Makes instance creation fail.
    pub fn fail_instance_create(&self, error: RemoteError) {
        self.lock().create_error = Some(error);
    }

    /// Makes network creation fail.
    pub fn fail_network(&self, error: RemoteError) {
        self.lock().network = Err(error);
    }

    /// Makes the key pair upload fail.
    pub fn fail_upload(&self, error: RemoteError) {
        self.lock().upload_error = Some(error);
    }

    /// Makes every instance action fail.
    pub fn fail_actions(&self, error: RemoteError) {
        self.lock().action_error = Some(error);
    }

    /// Returns a snapshot of the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Returns the number of calls recorded so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Returns how many calls satisfy `predicate`.
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&RemoteCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }
}

impl RemoteInstanceClient for FakeRemoteClient {
    fn create_key_pair<'a>(
        &'a self,
        config: &'a ProvisioningConfig,
    ) -> RemoteFuture<'a, KeyPairRecord> {
        Box::pin(async move {
            self.record(RemoteCall::CreateKeyPair);
            if let Some(error) = self.lock().key_pair_error.clone() {
                return Err(error);
            }
            Ok(KeyPairRecord {
                public_key_material: config
                    .key_pair_material
                    .clone()
                    .unwrap_or_else(|| String::from("ssh-rsa AAAAfake ucloud-machine")),
                private_key_ref: config.ssh_key_path.clone(),
            })
        })
    }

    fn create_instance<'a>(
        &'a self,
        _config: &'a ProvisioningConfig,
        _key_pair: &'a KeyPairRecord,
    ) -> RemoteFuture<'a, String> {
        Box::pin(async move {
            self.record(RemoteCall::CreateInstance);
            let state = self.lock();
            match state.create_error.clone() {
                Some(error) => Err(error),
                None => Ok(state.instance_id.clone()),
            }
        })
    }

    fn describe_instance<'a>(
        &'a self,
        _region: &'a str,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, InstanceDescription> {
        Box::pin(async move {
            self.record(RemoteCall::Describe(instance_id.to_owned()));
            let mut state = self.lock();
            let raw_state = match state.states.pop_front() {
                Some(next) => next?,
                None => state.fallback_state.clone(),
            };
            let (private_ip, public_ip) = match &state.network {
                Ok(network) => (Some(network.private_ip.clone()), network.public_ip.clone()),
                Err(_) => (None, None),
            };
            Ok(InstanceDescription {
                raw_state,
                private_ip,
                public_ip,
            })
        })
    }

    fn instance_action<'a>(
        &'a self,
        action: InstanceAction,
        _region: &'a str,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            self.record(RemoteCall::Action(action, instance_id.to_owned()));
            self.lock().action_error.clone().map_or(Ok(()), Err)
        })
    }

    fn create_network<'a>(
        &'a self,
        _config: &'a ProvisioningConfig,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, NetworkInfo> {
        Box::pin(async move {
            self.record(RemoteCall::CreateNetwork(instance_id.to_owned()));
            self.lock().network.clone()
        })
    }

    fn upload_key_pair<'a>(
        &'a self,
        _handle: &'a InstanceHandle,
        target: &'a SshTarget,
        _key_pair: &'a KeyPairRecord,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            self.record(RemoteCall::UploadKeyPair(target.host.clone()));
            self.lock().upload_error.clone().map_or(Ok(()), Err)
        })
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

type SideEffect = Box<dyn Fn(&[OsString]) + Send + Sync>;

#[derive(Default)]
struct RunnerState {
    responses: VecDeque<(CommandOutput, Option<SideEffect>)>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("invocations", &self.invocations())
            .finish_non_exhaustive()
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.lock().invocations.clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        let output = CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        };
        self.lock().responses.push_back((output, None));
    }

    /// Pushes a successful response that first runs `effect` with the
    /// invocation arguments, for example to create the files a real
    /// program would have written.
    pub fn push_success_with(&self, effect: impl Fn(&[OsString]) + Send + Sync + 'static) {
        let output = CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        self.lock()
            .responses
            .push_back((output, Some(Box::new(effect))));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(&str, &str)],
    ) -> Result<CommandOutput, CommandError> {
        let next = {
            let mut state = self.lock();
            state.invocations.push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
                envs: envs
                    .iter()
                    .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                    .collect(),
            });
            state.responses.pop_front()
        };
        let (output, effect) = next.ok_or_else(|| CommandError::Spawn {
            program: program.to_owned(),
            message: String::from("no scripted response available"),
        })?;
        if let Some(effect) = effect {
            effect(args);
        }
        Ok(output)
    }
}
