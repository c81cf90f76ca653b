//! Provider API boundary.
//!
//! [`CloudApi`] is the narrow seam the lifecycle operations consume:
//! resource lookup by name, server create/delete, power actions, and
//! action progress reads. [`HcloudApi`] implements it over the generated
//! `hcloud` REST client; tests script their own implementation.

use async_trait::async_trait;
use hcloud::apis::configuration::Configuration;
use hcloud::apis::{
    actions_api, datacenters_api, images_api, locations_api, server_types_api, servers_api,
};
use hcloud::models;

use machine_core::{Error, Result};

/// Application tag sent with every request, for provider-side attribution.
const APP_NAME: &str = "hcloud-driver";

/// Status vocabulary the provider reports for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    /// Migrating, rebuilding, or a status this driver does not know.
    Other,
}

impl From<models::server::Status> for ServerStatus {
    fn from(status: models::server::Status) -> Self {
        use hcloud::models::server::Status;
        match status {
            Status::Initializing => Self::Initializing,
            Status::Starting => Self::Starting,
            Status::Running => Self::Running,
            Status::Stopping => Self::Stopping,
            Status::Off => Self::Off,
            Status::Deleting => Self::Deleting,
            _ => Self::Other,
        }
    }
}

/// Terminal-or-not status of a provider action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Running,
    Success,
    Error,
}

impl From<models::action::Status> for ActionStatus {
    fn from(status: models::action::Status) -> Self {
        use hcloud::models::action::Status;
        match status {
            Status::Running => Self::Running,
            Status::Success => Self::Success,
            Status::Error => Self::Error,
        }
    }
}

/// Handle to an asynchronous operation in progress on the provider side.
#[derive(Debug, Clone)]
pub struct ActionHandle {
    pub id: i64,
    /// Command label (e.g. `create_server`), used for logging.
    pub command: String,
    pub status: ActionStatus,
    /// Provider error payload, present once the action has failed.
    pub error: Option<String>,
}

impl From<models::Action> for ActionHandle {
    fn from(action: models::Action) -> Self {
        Self {
            id: action.id,
            status: action.status.into(),
            error: action.error.as_ref().map(|e| format!("{e:?}")),
            command: action.command,
        }
    }
}

/// A provider resource resolved by name or ID.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub id: i64,
    pub name: String,
}

/// The slice of a server descriptor the driver acts on.
#[derive(Debug, Clone)]
pub struct ServerSummary {
    pub id: i64,
    pub status: ServerStatus,
    pub public_ipv4: Option<String>,
}

/// What the provider hands back for a create call: the new server plus
/// the asynchronous provisioning action.
#[derive(Debug, Clone)]
pub struct CreatedServer {
    pub server: ServerSummary,
    pub action: ActionHandle,
}

/// Assembled inputs for server creation, resolved beforehand.
#[derive(Debug, Clone)]
pub struct CreateServerSpec {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub location: Option<String>,
    pub datacenter: Option<String>,
}

/// Narrow provider interface the lifecycle operations run against.
///
/// Name lookups fail with [`Error::NotFound`] when the identifier does not
/// resolve; every call maps a provider 404 to the same variant so callers
/// can tell "gone" apart from other failures.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Build an authenticated client for the given API token.
    fn with_token(token: String) -> Result<Self>
    where
        Self: Sized;

    async fn server_type_by_name(&self, name: &str) -> Result<ResourceRef>;
    async fn image_by_name(&self, name: &str) -> Result<ResourceRef>;
    async fn location_by_name(&self, name: &str) -> Result<ResourceRef>;
    async fn datacenter_by_name(&self, name: &str) -> Result<ResourceRef>;

    async fn create_server(&self, spec: &CreateServerSpec) -> Result<CreatedServer>;
    async fn server_by_id(&self, id: i64) -> Result<ServerSummary>;
    async fn delete_server(&self, id: i64) -> Result<()>;

    async fn power_on(&self, id: i64) -> Result<ActionHandle>;
    async fn power_off(&self, id: i64) -> Result<ActionHandle>;
    async fn shutdown(&self, id: i64) -> Result<ActionHandle>;
    async fn reboot(&self, id: i64) -> Result<ActionHandle>;

    /// Fresh read of an action's progress.
    async fn action_by_id(&self, id: i64) -> Result<ActionHandle>;
}

/// Hetzner Cloud API client using the `hcloud` crate.
pub struct HcloudApi {
    config: Configuration,
}

impl HcloudApi {
    pub fn new(token: impl Into<String>) -> Self {
        let mut config = Configuration::new();
        config.bearer_access_token = Some(token.into());
        config.user_agent = Some(format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")));
        Self { config }
    }
}

fn api_error<T: std::fmt::Debug>(what: &str, err: hcloud::apis::Error<T>) -> Error {
    if let hcloud::apis::Error::ResponseError(resp) = &err {
        if u16::from(resp.status) == 404 {
            return Error::NotFound(what.to_string());
        }
    }
    Error::Provider(format!("{what}: {err}"))
}

fn summarize(server: &models::Server) -> ServerSummary {
    ServerSummary {
        id: server.id,
        status: server.status.into(),
        public_ipv4: public_ipv4(server),
    }
}

fn public_ipv4(server: &models::Server) -> Option<String> {
    server.public_net.ipv4.as_ref().map(|ipv4| ipv4.ip.clone())
}

/// The generated client marks some response payloads optional; accept the
/// action in whichever shape the endpoint carries it.
trait ActionField {
    fn into_handle(self) -> Option<ActionHandle>;
}

impl ActionField for models::Action {
    fn into_handle(self) -> Option<ActionHandle> {
        Some(self.into())
    }
}

impl ActionField for Box<models::Action> {
    fn into_handle(self) -> Option<ActionHandle> {
        Some((*self).into())
    }
}

impl<T: ActionField> ActionField for Option<T> {
    fn into_handle(self) -> Option<ActionHandle> {
        self.and_then(ActionField::into_handle)
    }
}

fn require_action<T: ActionField>(payload: T, what: &str) -> Result<ActionHandle> {
    payload
        .into_handle()
        .ok_or_else(|| Error::Provider(format!("{what}: action missing from response")))
}

#[async_trait]
impl CloudApi for HcloudApi {
    fn with_token(token: String) -> Result<Self> {
        Ok(Self::new(token))
    }

    async fn server_type_by_name(&self, name: &str) -> Result<ResourceRef> {
        let resp = server_types_api::list_server_types(
            &self.config,
            server_types_api::ListServerTypesParams {
                name: Some(name.to_string()),
                page: None,
                per_page: None,
            },
        )
        .await
        .map_err(|e| api_error("list server types", e))?;

        resp.server_types
            .into_iter()
            .next()
            .map(|server_type| ResourceRef {
                id: server_type.id,
                name: server_type.name,
            })
            .ok_or_else(|| Error::NotFound(format!("server type \"{name}\"")))
    }

    async fn image_by_name(&self, name: &str) -> Result<ResourceRef> {
        let resp = images_api::list_images(
            &self.config,
            images_api::ListImagesParams {
                sort: None,
                r#type: None,
                status: None,
                bound_to: None,
                include_deprecated: None,
                name: Some(name.to_string()),
                label_selector: None,
                architecture: None,
                page: None,
                per_page: None,
            },
        )
        .await
        .map_err(|e| api_error("list images", e))?;

        resp.images
            .into_iter()
            .next()
            .map(|image| ResourceRef {
                id: image.id,
                // Snapshots have no name; fall back to the requested key.
                name: image.name.unwrap_or_else(|| name.to_string()),
            })
            .ok_or_else(|| Error::NotFound(format!("image \"{name}\"")))
    }

    async fn location_by_name(&self, name: &str) -> Result<ResourceRef> {
        let resp = locations_api::list_locations(
            &self.config,
            locations_api::ListLocationsParams {
                name: Some(name.to_string()),
                sort: None,
                page: None,
                per_page: None,
            },
        )
        .await
        .map_err(|e| api_error("list locations", e))?;

        resp.locations
            .into_iter()
            .next()
            .map(|location| ResourceRef {
                id: location.id,
                name: location.name,
            })
            .ok_or_else(|| Error::NotFound(format!("location \"{name}\"")))
    }

    async fn datacenter_by_name(&self, name: &str) -> Result<ResourceRef> {
        let resp = datacenters_api::list_data_centers(
            &self.config,
            datacenters_api::ListDataCentersParams {
                name: Some(name.to_string()),
                sort: None,
                page: None,
                per_page: None,
            },
        )
        .await
        .map_err(|e| api_error("list datacenters", e))?;

        resp.datacenters
            .into_iter()
            .next()
            .map(|datacenter| ResourceRef {
                id: datacenter.id,
                name: datacenter.name,
            })
            .ok_or_else(|| Error::NotFound(format!("datacenter \"{name}\"")))
    }

    async fn create_server(&self, spec: &CreateServerSpec) -> Result<CreatedServer> {
        let resp = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: models::CreateServerRequest {
                    name: spec.name.clone(),
                    server_type: spec.server_type.clone(),
                    image: spec.image.clone(),
                    location: spec.location.clone(),
                    datacenter: spec.datacenter.clone(),
                    user_data: None,
                    networks: None,
                    firewalls: None,
                    ssh_keys: None,
                    volumes: None,
                    start_after_create: None,
                    automount: None,
                    labels: None,
                    placement_group: None,
                    public_net: None,
                },
            },
        )
        .await
        .map_err(|e| api_error("create server", e))?;

        let server = summarize(&resp.server);
        let action = require_action(resp.action, "create server")?;
        Ok(CreatedServer { server, action })
    }

    async fn server_by_id(&self, id: i64) -> Result<ServerSummary> {
        let resp = servers_api::get_server(&self.config, servers_api::GetServerParams { id })
            .await
            .map_err(|e| api_error(&format!("server {id}"), e))?;

        let server = resp
            .server
            .ok_or_else(|| Error::NotFound(format!("server {id}")))?;
        Ok(summarize(&server))
    }

    async fn delete_server(&self, id: i64) -> Result<()> {
        servers_api::delete_server(&self.config, servers_api::DeleteServerParams { id })
            .await
            .map_err(|e| api_error("delete server", e))?;
        Ok(())
    }

    async fn power_on(&self, id: i64) -> Result<ActionHandle> {
        let resp =
            servers_api::power_on_server(&self.config, servers_api::PowerOnServerParams { id })
                .await
                .map_err(|e| api_error("power on server", e))?;
        require_action(resp.action, "power on server")
    }

    async fn power_off(&self, id: i64) -> Result<ActionHandle> {
        let resp =
            servers_api::power_off_server(&self.config, servers_api::PowerOffServerParams { id })
                .await
                .map_err(|e| api_error("power off server", e))?;
        require_action(resp.action, "power off server")
    }

    async fn shutdown(&self, id: i64) -> Result<ActionHandle> {
        let resp =
            servers_api::shutdown_server(&self.config, servers_api::ShutdownServerParams { id })
                .await
                .map_err(|e| api_error("shutdown server", e))?;
        require_action(resp.action, "shutdown server")
    }

    async fn reboot(&self, id: i64) -> Result<ActionHandle> {
        // Graceful ACPI reboot, as opposed to the hard reset endpoint.
        let resp = servers_api::soft_reboot_server(
            &self.config,
            servers_api::SoftRebootServerParams { id },
        )
        .await
        .map_err(|e| api_error("reboot server", e))?;
        require_action(resp.action, "reboot server")
    }

    async fn action_by_id(&self, id: i64) -> Result<ActionHandle> {
        let resp = actions_api::get_action(&self.config, actions_api::GetActionParams { id })
            .await
            .map_err(|e| api_error(&format!("action {id}"), e))?;
        require_action(resp.action, "get action")
    }
}
