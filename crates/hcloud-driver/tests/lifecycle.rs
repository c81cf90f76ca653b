//! Lifecycle behavior against a scripted in-memory provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use hcloud_driver::api::{
    ActionHandle, ActionStatus, CloudApi, CreateServerSpec, CreatedServer, ResourceRef,
    ServerStatus, ServerSummary,
};
use hcloud_driver::{HcloudDriver, WaitOptions, wait_for_action};
use machine_core::{Driver, Error, MachineState, Result};

const SERVER_ID: i64 = 42;
const IPV4: &str = "203.0.113.9";

#[derive(Default)]
struct MockState {
    server: Option<ServerSummary>,
    lookup_failure: Option<String>,
    server_gone: bool,
    action_plan: VecDeque<ActionHandle>,
    actions_never_finish: bool,
    deleted: bool,
    calls: Vec<String>,
}

/// Scripted provider: knows one server type, image, location and
/// datacenter, provisions server 42, and completes actions according to
/// `action_plan` (empty plan = immediate success).
#[derive(Clone, Default)]
struct MockApi {
    inner: Arc<Mutex<MockState>>,
}

impl MockApi {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap()
    }

    fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn log(&self, call: String) {
        self.state().calls.push(call);
    }

    fn next_action(&self, command: &str) -> ActionHandle {
        let mut state = self.state();
        if state.actions_never_finish {
            return handle(command, ActionStatus::Running);
        }
        match state.action_plan.pop_front() {
            Some(mut action) => {
                action.command = command.to_string();
                action
            }
            None => handle(command, ActionStatus::Success),
        }
    }

    fn resolve(&self, kind: &str, known: &str, name: &str) -> Result<ResourceRef> {
        self.log(format!("{kind} {name}"));
        if name == known {
            Ok(ResourceRef {
                id: 1,
                name: name.to_string(),
            })
        } else {
            Err(Error::NotFound(format!("{kind} \"{name}\"")))
        }
    }
}

fn handle(command: &str, status: ActionStatus) -> ActionHandle {
    ActionHandle {
        id: 7,
        command: command.to_string(),
        status,
        error: None,
    }
}

fn server(status: ServerStatus) -> ServerSummary {
    ServerSummary {
        id: SERVER_ID,
        status,
        public_ipv4: Some(IPV4.to_string()),
    }
}

#[async_trait]
impl CloudApi for MockApi {
    fn with_token(_token: String) -> Result<Self> {
        Ok(Self::default())
    }

    async fn server_type_by_name(&self, name: &str) -> Result<ResourceRef> {
        self.resolve("server_type", "cx11", name)
    }

    async fn image_by_name(&self, name: &str) -> Result<ResourceRef> {
        self.resolve("image", "ubuntu-18.04", name)
    }

    async fn location_by_name(&self, name: &str) -> Result<ResourceRef> {
        self.resolve("location", "fsn1", name)
    }

    async fn datacenter_by_name(&self, name: &str) -> Result<ResourceRef> {
        self.resolve("datacenter", "fsn1-dc8", name)
    }

    async fn create_server(&self, spec: &CreateServerSpec) -> Result<CreatedServer> {
        self.log(format!("create_server {}", spec.name));
        let created = server(ServerStatus::Running);
        self.state().server = Some(created.clone());
        Ok(CreatedServer {
            server: created,
            action: self.next_action("create_server"),
        })
    }

    async fn server_by_id(&self, id: i64) -> Result<ServerSummary> {
        self.log(format!("server_by_id {id}"));
        let state = self.state();
        if let Some(message) = &state.lookup_failure {
            return Err(Error::Provider(message.clone()));
        }
        if state.server_gone {
            return Err(Error::NotFound(format!("server {id}")));
        }
        state
            .server
            .clone()
            .ok_or_else(|| Error::NotFound(format!("server {id}")))
    }

    async fn delete_server(&self, id: i64) -> Result<()> {
        self.log(format!("delete_server {id}"));
        let mut state = self.state();
        state.deleted = true;
        state.server_gone = true;
        Ok(())
    }

    async fn power_on(&self, id: i64) -> Result<ActionHandle> {
        self.log(format!("power_on {id}"));
        Ok(self.next_action("start_server"))
    }

    async fn power_off(&self, id: i64) -> Result<ActionHandle> {
        self.log(format!("power_off {id}"));
        Ok(self.next_action("stop_server"))
    }

    async fn shutdown(&self, id: i64) -> Result<ActionHandle> {
        self.log(format!("shutdown {id}"));
        Ok(self.next_action("shutdown_server"))
    }

    async fn reboot(&self, id: i64) -> Result<ActionHandle> {
        self.log(format!("reboot {id}"));
        Ok(self.next_action("reboot_server"))
    }

    async fn action_by_id(&self, id: i64) -> Result<ActionHandle> {
        self.log(format!("action_by_id {id}"));
        let mut state = self.state();
        if state.actions_never_finish {
            return Ok(handle("noop", ActionStatus::Running));
        }
        Ok(state
            .action_plan
            .pop_front()
            .unwrap_or_else(|| handle("noop", ActionStatus::Success)))
    }
}

fn driver(api: &MockApi) -> HcloudDriver<MockApi> {
    HcloudDriver::with_api("box-1", "/tmp/machines/box-1", api.clone())
}

#[tokio::test]
async fn full_lifecycle_scenario() {
    let api = MockApi::default();
    let mut driver = driver(&api);

    driver.create().await.unwrap();
    assert_eq!(driver.server_id(), Some(SERVER_ID));
    assert_eq!(driver.ip().unwrap(), IPV4);
    assert_eq!(driver.ssh_hostname().unwrap(), IPV4);
    assert_eq!(driver.state().await.unwrap(), MachineState::Running);
    assert_eq!(driver.url().await.unwrap(), format!("tcp://{IPV4}:2376"));

    api.state().server_gone = true;
    driver.remove().await.unwrap();
    assert!(!api.state().deleted);
}

#[tokio::test]
async fn create_resolves_each_resource_by_its_own_identifier() {
    let api = MockApi::default();
    let mut driver = driver(&api);
    driver.location = Some("fsn1".into());
    driver.datacenter = Some("fsn1-dc8".into());

    driver.create().await.unwrap();

    let calls = api.calls();
    assert!(calls.contains(&"server_type cx11".to_string()));
    assert!(calls.contains(&"image ubuntu-18.04".to_string()));
    assert!(calls.contains(&"datacenter fsn1-dc8".to_string()));
    assert!(calls.contains(&"location fsn1".to_string()));
}

#[tokio::test]
async fn create_aborts_before_provisioning_on_unknown_image() {
    let api = MockApi::default();
    let mut driver = driver(&api);
    driver.image = "debian-4.0".into();

    let err = driver.create().await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!api.calls().iter().any(|call| call.starts_with("create_server")));
    assert_eq!(driver.server_id(), None);
}

#[tokio::test]
async fn create_does_not_bind_identity_when_wait_fails() {
    let api = MockApi::default();
    api.state().action_plan.push_back(ActionHandle {
        id: 7,
        command: "create_server".into(),
        status: ActionStatus::Error,
        error: Some("placement failure".into()),
    });
    let mut driver = driver(&api);

    let err = driver.create().await.unwrap_err();
    match err {
        Error::CreateIncomplete { server_id, source } => {
            // The caller still learns the new server's identity for manual
            // cleanup, even though nothing was bound.
            assert_eq!(server_id, SERVER_ID);
            assert!(source.to_string().contains("placement failure"));
        }
        other => panic!("expected CreateIncomplete, got {other:?}"),
    }
    assert_eq!(driver.server_id(), None);
    assert!(driver.ip().is_err());
}

#[tokio::test]
async fn operations_before_create_are_rejected() {
    let api = MockApi::default();
    let driver = driver(&api);

    for result in [
        driver.start().await,
        driver.stop().await,
        driver.restart().await,
        driver.kill().await,
        driver.remove().await,
    ] {
        assert!(matches!(result, Err(Error::NotProvisioned)));
    }
    assert!(matches!(driver.state().await, Err(Error::NotProvisioned)));
    assert!(matches!(driver.ip(), Err(Error::NotProvisioned)));
    // Nothing may reach the provider with an undefined server identity.
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn power_verbs_reread_the_server_then_act() {
    let api = MockApi::default();
    let mut driver = driver(&api);
    driver.create().await.unwrap();

    api.clear_calls();
    driver.start().await.unwrap();
    assert_eq!(api.calls(), ["server_by_id 42", "power_on 42"]);

    api.clear_calls();
    driver.stop().await.unwrap();
    assert_eq!(api.calls(), ["server_by_id 42", "shutdown 42"]);

    api.clear_calls();
    driver.restart().await.unwrap();
    assert_eq!(api.calls(), ["server_by_id 42", "reboot 42"]);

    api.clear_calls();
    driver.kill().await.unwrap();
    assert_eq!(api.calls(), ["server_by_id 42", "power_off 42"]);
}

#[tokio::test]
async fn remove_deletes_a_live_server_without_waiting() {
    let api = MockApi::default();
    let mut driver = driver(&api);
    driver.create().await.unwrap();
    api.clear_calls();

    driver.remove().await.unwrap();
    assert_eq!(api.calls(), ["server_by_id 42", "delete_server 42"]);

    // Second remove: the server is gone, which is success.
    driver.remove().await.unwrap();
}

#[tokio::test]
async fn remove_propagates_non_not_found_lookup_errors() {
    let api = MockApi::default();
    let mut driver = driver(&api);
    driver.create().await.unwrap();
    api.state().lookup_failure = Some("connection reset".into());

    let err = driver.remove().await.unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
    assert!(!api.state().deleted);
}

#[tokio::test]
async fn state_follows_the_provider_status() {
    let api = MockApi::default();
    let mut driver = driver(&api);
    driver.create().await.unwrap();

    api.state().server = Some(server(ServerStatus::Off));
    assert_eq!(driver.state().await.unwrap(), MachineState::Stopped);

    api.state().server = Some(server(ServerStatus::Other));
    assert_eq!(driver.state().await.unwrap(), MachineState::Unknown);
}

#[tokio::test]
async fn url_requires_a_running_machine() {
    let api = MockApi::default();
    let mut driver = driver(&api);
    driver.create().await.unwrap();
    api.state().server = Some(server(ServerStatus::Off));

    let err = driver.url().await.unwrap_err();
    match err {
        Error::NotRunning { name, state } => {
            assert_eq!(name, "box-1");
            assert_eq!(state, MachineState::Stopped);
        }
        other => panic!("expected NotRunning, got {other:?}"),
    }
}

#[tokio::test]
async fn waiter_polls_an_action_to_success() {
    let api = MockApi::default();
    api.state().action_plan.extend([
        handle("start_server", ActionStatus::Running),
        handle("start_server", ActionStatus::Success),
    ]);
    let opts = WaitOptions {
        poll_interval: Duration::from_millis(1),
        timeout: None,
    };

    wait_for_action(&api, handle("start_server", ActionStatus::Running), &opts)
        .await
        .unwrap();
    let polls = api
        .calls()
        .iter()
        .filter(|call| call.starts_with("action_by_id"))
        .count();
    assert_eq!(polls, 2);
}

#[tokio::test]
async fn waiter_surfaces_the_action_failure_payload() {
    let api = MockApi::default();
    let action = ActionHandle {
        id: 7,
        command: "reboot_server".into(),
        status: ActionStatus::Error,
        error: Some("server is locked".into()),
    };

    let err = wait_for_action(&api, action, &WaitOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::ActionFailed { command, detail } => {
            assert_eq!(command, "reboot_server");
            assert_eq!(detail, "server is locked");
        }
        other => panic!("expected ActionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn waiter_times_out_when_an_action_never_finishes() {
    let api = MockApi::default();
    api.state().actions_never_finish = true;
    let opts = WaitOptions {
        poll_interval: Duration::from_millis(1),
        timeout: Some(Duration::from_millis(20)),
    };

    let err = wait_for_action(&api, handle("create_server", ActionStatus::Running), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ActionTimeout { command, .. } if command == "create_server"));
}
