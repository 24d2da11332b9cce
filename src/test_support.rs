//! Test doubles shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::gateway::{
    Gateway, GatewayFuture, ImageStatus, InstanceStatus, RuleDeletion, RuleInsert,
};
use crate::lab::{BootstrapScript, FirewallRule, ImageRequest, InstanceRequest, LabSpec};
use crate::shell::{CommandOutput, CommandRunner, ShellError};

/// Address the fake gateway reports for a running instance.
pub const FAKE_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));

/// Lab with fixed values for tests. Scripts resolve against the current
/// directory until the caller points `script_dir` elsewhere.
#[must_use]
pub fn sample_lab(name: &str) -> LabSpec {
    LabSpec {
        project_id: String::from("demo-project"),
        name: name.to_owned(),
        zone: String::from("us-central1-a"),
        machine_type: String::from("c2-standard-4"),
        disk_size_gb: 10,
        create_custom_image: false,
        custom_image_name: String::from("lab-image"),
        source_image: String::from("projects/ubuntu-os-cloud/global/images/family/ubuntu-2204-lts"),
        network: String::from("global/networks/default"),
        min_cpu_platform: String::from("Intel Cascade Lake"),
        ssh_user: String::from("lab"),
        ssh_public_key: String::from("ssh-ed25519 AAAA test@example\n"),
        script_dir: Utf8PathBuf::from("."),
        scripts: BootstrapScript::default(),
    }
}

/// Command runner that replays queued outputs in FIFO order.
///
/// Clones share the queue and the invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// One call made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name.
    pub program: String,
    /// Arguments.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Program and arguments joined by spaces.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ScriptedRunner {
    /// Runner with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Number of queued outputs not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.responses.borrow().len()
    }

    /// Queues a zero exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Queues `code` with empty streams.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Queues `code` with a canned stderr message.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Queues an output without an exit code.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Queues an arbitrary output.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ShellError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ShellError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Gateway operations the fake records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum GatewayCall {
    /// [`Gateway::image_status`].
    ImageStatus,
    /// [`Gateway::create_image`].
    CreateImage,
    /// [`Gateway::delete_image`].
    DeleteImage,
    /// [`Gateway::create_instance`].
    CreateInstance,
    /// [`Gateway::instance_status`].
    InstanceStatus,
    /// [`Gateway::delete_instance`].
    DeleteInstance,
    /// [`Gateway::stop_instance`].
    StopInstance,
    /// [`Gateway::start_instance`].
    StartInstance,
    /// [`Gateway::external_address`].
    ExternalAddress,
    /// [`Gateway::upsert_firewall_rule`].
    UpsertFirewallRule,
    /// [`Gateway::firewall_rule_exists`].
    FirewallRuleExists,
    /// [`Gateway::delete_firewall_rules`].
    DeleteFirewallRules,
}

/// Errors produced by [`FakeGateway`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeGatewayError {
    /// Failure injected with [`FakeGateway::fail_on`].
    #[error("injected failure in {0:?}")]
    Injected(GatewayCall),
    /// The instance already existed when creation was requested.
    #[error("instance {0} already exists")]
    InstanceExists(String),
    /// The instance was missing when a mutation was requested.
    #[error("instance {0} not found")]
    InstanceMissing(String),
}

#[derive(Debug)]
struct FakeState {
    instance: InstanceStatus,
    instance_next: VecDeque<InstanceStatus>,
    image: ImageStatus,
    image_next: VecDeque<ImageStatus>,
    image_build_result: ImageStatus,
    rules: BTreeSet<String>,
    address_delay: u32,
    failures: HashSet<GatewayCall>,
    calls: BTreeMap<GatewayCall, u32>,
    created_instances: Vec<InstanceRequest>,
    upserted_rules: Vec<FirewallRule>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            instance: InstanceStatus::Absent,
            instance_next: VecDeque::new(),
            image: ImageStatus::Absent,
            image_next: VecDeque::new(),
            image_build_result: ImageStatus::Ready,
            rules: BTreeSet::new(),
            address_delay: 0,
            failures: HashSet::new(),
            calls: BTreeMap::new(),
            created_instances: Vec::new(),
            upserted_rules: Vec::new(),
        }
    }
}

impl FakeState {
    fn record(&mut self, call: GatewayCall) -> Result<(), FakeGatewayError> {
        *self.calls.entry(call).or_default() += 1;
        if self.failures.contains(&call) {
            return Err(FakeGatewayError::Injected(call));
        }
        Ok(())
    }

    /// Moves the instance through `steps`; each status query reveals the
    /// next one.
    fn transition(&mut self, steps: &[InstanceStatus]) {
        self.instance_next = steps.iter().copied().collect();
    }
}

/// In-memory [`Gateway`] with a small lifecycle model.
///
/// Mutations take effect one status query at a time: after
/// `create_instance` the first query reports `Provisioning` and the next
/// `Running`, so every wait loop polls at least twice.
#[derive(Clone, Debug, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    /// Gateway with no resources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds the instance state.
    #[must_use]
    pub fn with_instance(self, status: InstanceStatus) -> Self {
        self.state().instance = status;
        self
    }

    /// Seeds the image state.
    #[must_use]
    pub fn with_image(self, status: ImageStatus) -> Self {
        self.state().image = status;
        self
    }

    /// Seeds an existing firewall rule.
    #[must_use]
    pub fn with_rule(self, name: &str) -> Self {
        self.state().rules.insert(name.to_owned());
        self
    }

    /// Makes newly built images end in `status` instead of `Ready`.
    #[must_use]
    pub fn with_image_build_result(self, status: ImageStatus) -> Self {
        self.state().image_build_result = status;
        self
    }

    /// Queues instance states revealed by successive status queries before
    /// the current state is reported again.
    #[must_use]
    pub fn with_instance_sequence(self, steps: &[InstanceStatus]) -> Self {
        self.state().transition(steps);
        self
    }

    /// Queues image states revealed by successive status queries.
    #[must_use]
    pub fn with_image_sequence(self, steps: &[ImageStatus]) -> Self {
        self.state().image_next = steps.iter().copied().collect();
        self
    }

    /// Reports no address for the first `queries` address lookups.
    #[must_use]
    pub fn with_address_delay(self, queries: u32) -> Self {
        self.state().address_delay = queries;
        self
    }

    /// Makes every call to `call` fail.
    #[must_use]
    pub fn fail_on(self, call: GatewayCall) -> Self {
        self.state().failures.insert(call);
        self
    }

    /// Number of times `call` was made.
    #[must_use]
    pub fn calls(&self, call: GatewayCall) -> u32 {
        self.state().calls.get(&call).copied().unwrap_or_default()
    }

    /// Current instance state, ignoring pending transitions.
    #[must_use]
    pub fn instance(&self) -> InstanceStatus {
        let state = self.state();
        state.instance_next.back().copied().unwrap_or(state.instance)
    }

    /// Current image state, ignoring pending transitions.
    #[must_use]
    pub fn image(&self) -> ImageStatus {
        let state = self.state();
        state.image_next.back().copied().unwrap_or(state.image)
    }

    /// Firewall rules currently present.
    #[must_use]
    pub fn rules(&self) -> Vec<String> {
        self.state().rules.iter().cloned().collect()
    }

    /// Instance requests received so far.
    #[must_use]
    pub fn created_instances(&self) -> Vec<InstanceRequest> {
        self.state().created_instances.clone()
    }

    /// Firewall rules submitted so far.
    #[must_use]
    pub fn upserted_rules(&self) -> Vec<FirewallRule> {
        self.state().upserted_rules.clone()
    }

    fn settle_instance(&self) -> InstanceStatus {
        let mut state = self.state();
        if let Some(next) = state.instance_next.pop_front() {
            state.instance = next;
        }
        state.instance
    }

    fn settle_image(&self) -> ImageStatus {
        let mut state = self.state();
        if let Some(next) = state.image_next.pop_front() {
            state.image = next;
        }
        state.image
    }

    fn mutate_instance(
        &self,
        call: GatewayCall,
        name: &str,
        steps: &[InstanceStatus],
    ) -> Result<(), FakeGatewayError> {
        let mut state = self.state();
        state.record(call)?;
        if state.instance == InstanceStatus::Absent && state.instance_next.is_empty() {
            return Err(FakeGatewayError::InstanceMissing(name.to_owned()));
        }
        state.transition(steps);
        Ok(())
    }
}

impl Gateway for FakeGateway {
    type Error = FakeGatewayError;

    fn image_status<'a>(&'a self, _name: &'a str) -> GatewayFuture<'a, ImageStatus, Self::Error> {
        Box::pin(async move {
            self.state().record(GatewayCall::ImageStatus)?;
            Ok(self.settle_image())
        })
    }

    fn create_image<'a>(&'a self, _request: &'a ImageRequest) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.record(GatewayCall::CreateImage)?;
            let result = state.image_build_result;
            state.image = ImageStatus::Absent;
            state.image_next = [ImageStatus::Pending, result].into_iter().collect();
            Ok(())
        })
    }

    fn delete_image<'a>(&'a self, _name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.record(GatewayCall::DeleteImage)?;
            state.image = ImageStatus::Absent;
            state.image_next.clear();
            Ok(())
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.record(GatewayCall::CreateInstance)?;
            if state.instance != InstanceStatus::Absent {
                return Err(FakeGatewayError::InstanceExists(request.name.clone()));
            }
            state.created_instances.push(request.clone());
            state.transition(&[InstanceStatus::Provisioning, InstanceStatus::Running]);
            Ok(())
        })
    }

    fn instance_status<'a>(
        &'a self,
        _name: &'a str,
    ) -> GatewayFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move {
            self.state().record(GatewayCall::InstanceStatus)?;
            Ok(self.settle_instance())
        })
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.mutate_instance(
                GatewayCall::DeleteInstance,
                name,
                &[InstanceStatus::Stopping, InstanceStatus::Absent],
            )
        })
    }

    fn stop_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.mutate_instance(
                GatewayCall::StopInstance,
                name,
                &[InstanceStatus::Stopping, InstanceStatus::Terminated],
            )
        })
    }

    fn start_instance<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.mutate_instance(
                GatewayCall::StartInstance,
                name,
                &[InstanceStatus::Provisioning, InstanceStatus::Running],
            )
        })
    }

    fn external_address<'a>(
        &'a self,
        _name: &'a str,
    ) -> GatewayFuture<'a, Option<IpAddr>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.record(GatewayCall::ExternalAddress)?;
            if state.address_delay > 0 {
                state.address_delay -= 1;
                return Ok(None);
            }
            Ok((state.instance == InstanceStatus::Running).then_some(FAKE_ADDRESS))
        })
    }

    fn upsert_firewall_rule<'a>(
        &'a self,
        rule: &'a FirewallRule,
    ) -> GatewayFuture<'a, RuleInsert, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.record(GatewayCall::UpsertFirewallRule)?;
            state.upserted_rules.push(rule.clone());
            if state.rules.insert(rule.name.clone()) {
                Ok(RuleInsert::Created)
            } else {
                Ok(RuleInsert::AlreadyExists)
            }
        })
    }

    fn firewall_rule_exists<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, bool, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.record(GatewayCall::FirewallRuleExists)?;
            Ok(state.rules.contains(name))
        })
    }

    fn delete_firewall_rules<'a>(
        &'a self,
        names: &'a [String],
    ) -> GatewayFuture<'a, Vec<RuleDeletion>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.record(GatewayCall::DeleteFirewallRules)?;
            Ok(names
                .iter()
                .map(|name| RuleDeletion {
                    name: name.clone(),
                    deleted: state.rules.remove(name),
                })
                .collect())
        })
    }
}

/// Serialises environment mutation across tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Holds [`ENV_LOCK`] and restores the previous values on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets each pair while holding the lock.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: `ENV_LOCK` serialises every environment mutation.
            unsafe { env::set_var(key, value) };
        }
        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes each variable while holding the lock.
    pub async fn remove_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: `ENV_LOCK` serialises every environment mutation.
            unsafe { env::remove_var(key) };
        }
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: the guard still holds `ENV_LOCK`.
            unsafe {
                match old {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
