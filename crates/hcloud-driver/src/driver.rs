//! Hetzner Cloud machine driver.
//!
//! The driver is the long-lived handle for one machine record: configured
//! once with the user's options, it resolves named provider resources,
//! issues the lifecycle calls, and tracks each returned action to its
//! terminal outcome before an operation reports back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use machine_core::{
    Driver, DriverOptions, Error, Flag, MachineBase, MachineState, Result, must_be_running,
};

use crate::api::{CloudApi, CreateServerSpec, HcloudApi};
use crate::state;
use crate::waiter::{WaitOptions, wait_for_action};

pub const DRIVER_NAME: &str = "hcloud";
pub const DEFAULT_IMAGE: &str = "ubuntu-18.04";
pub const DEFAULT_SERVER_TYPE: &str = "cx11";

/// Port the engine on the provisioned machine listens on.
const ENGINE_PORT: u16 = 2376;

const TOKEN_FLAG: Flag = Flag {
    name: "hcloud-token",
    env_var: "HCLOUD_TOKEN",
    usage: "Hetzner Cloud API token",
    default: None,
};

const IMAGE_FLAG: Flag = Flag {
    name: "hcloud-image",
    env_var: "HCLOUD_IMAGE",
    usage: "Image name or ID the server is provisioned from",
    default: Some(DEFAULT_IMAGE),
};

const TYPE_FLAG: Flag = Flag {
    name: "hcloud-type",
    env_var: "HCLOUD_TYPE",
    usage: "Server type of the machine",
    default: Some(DEFAULT_SERVER_TYPE),
};

const LOCATION_FLAG: Flag = Flag {
    name: "hcloud-location",
    env_var: "HCLOUD_LOCATION",
    usage: "Location to create the machine in",
    default: None,
};

const DATACENTER_FLAG: Flag = Flag {
    name: "hcloud-datacenter",
    env_var: "HCLOUD_DATACENTER",
    usage: "Datacenter to create the machine in",
    default: None,
};

/// Driver state for one Hetzner Cloud server.
///
/// Provisioning parameters are set once by `configure` and persisted by
/// the host framework; `server_id` and the public address are bound
/// together, exactly once, by a fully successful `create`. The client
/// handle is rebuilt from options on every configure and never persisted.
///
/// Generic over [`CloudApi`] so the lifecycle logic can be exercised
/// against a scripted transport; production code uses the [`HcloudApi`]
/// default.
#[derive(Serialize, Deserialize)]
// The client handle is skipped, so the persisted record is concrete and
// needs no serde capability from `A`.
#[serde(bound(serialize = "", deserialize = ""))]
pub struct HcloudDriver<A = HcloudApi> {
    #[serde(flatten)]
    pub base: MachineBase,
    pub image: String,
    pub server_type: String,
    pub location: Option<String>,
    pub datacenter: Option<String>,
    #[serde(default)]
    pub wait: WaitOptions,
    server_id: Option<i64>,
    #[serde(skip)]
    api: Option<A>,
}

impl HcloudDriver {
    /// Driver bound to a machine record, not yet configured.
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self::unconfigured(machine_name, store_path)
    }
}

impl<A: CloudApi> HcloudDriver<A> {
    fn unconfigured(machine_name: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self {
            base: MachineBase::new(machine_name, store_path),
            image: DEFAULT_IMAGE.into(),
            server_type: DEFAULT_SERVER_TYPE.into(),
            location: None,
            datacenter: None,
            wait: WaitOptions::default(),
            server_id: None,
            api: None,
        }
    }

    /// Driver over a custom transport, skipping `configure`. Used by tests
    /// and by embedders that construct their own client.
    pub fn with_api(
        machine_name: impl Into<String>,
        store_path: impl Into<String>,
        api: A,
    ) -> Self {
        Self {
            api: Some(api),
            ..Self::unconfigured(machine_name, store_path)
        }
    }

    /// Provider-assigned server ID, once `create` has succeeded.
    pub fn server_id(&self) -> Option<i64> {
        self.server_id
    }

    fn api(&self) -> Result<&A> {
        self.api.as_ref().ok_or(Error::NotConfigured)
    }

    /// Every post-create operation must target the bound server, never an
    /// undefined one.
    fn bound_server_id(&self) -> Result<i64> {
        self.server_id.ok_or(Error::NotProvisioned)
    }
}

fn require(opts: &DriverOptions, flag: &Flag) -> Result<String> {
    match opts.resolve(flag) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::MissingOption(flag.name)),
    }
}

fn optional(opts: &DriverOptions, flag: &Flag) -> Option<String> {
    opts.resolve(flag).filter(|value| !value.is_empty())
}

#[async_trait]
impl<A: CloudApi> Driver for HcloudDriver<A> {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn machine_name(&self) -> &str {
        &self.base.machine_name
    }

    fn create_flags(&self) -> Vec<Flag> {
        vec![
            TOKEN_FLAG,
            IMAGE_FLAG,
            TYPE_FLAG,
            LOCATION_FLAG,
            DATACENTER_FLAG,
        ]
    }

    fn configure(&mut self, opts: &DriverOptions) -> Result<()> {
        dotenvy::dotenv().ok();

        let token = require(opts, &TOKEN_FLAG)?;
        self.image = require(opts, &IMAGE_FLAG)?;
        self.server_type = require(opts, &TYPE_FLAG)?;
        self.location = optional(opts, &LOCATION_FLAG);
        self.datacenter = optional(opts, &DATACENTER_FLAG);
        self.api = Some(A::with_token(token)?);
        Ok(())
    }

    async fn create(&mut self) -> Result<()> {
        let api = self.api()?;

        let server_type = api.server_type_by_name(&self.server_type).await?;
        let image = api.image_by_name(&self.image).await?;
        let datacenter = match self.datacenter.as_deref() {
            Some(name) => Some(api.datacenter_by_name(name).await?),
            None => None,
        };
        let location = match self.location.as_deref() {
            Some(name) => Some(api.location_by_name(name).await?),
            None => None,
        };

        let created = api
            .create_server(&CreateServerSpec {
                name: self.base.machine_name.clone(),
                server_type: server_type.name,
                image: image.name,
                location: location.map(|location| location.name),
                datacenter: datacenter.map(|datacenter| datacenter.name),
            })
            .await?;
        let server_id = created.server.id;
        info!(server_id, machine = %self.base.machine_name, "server created, waiting for provisioning");

        // Identity is bound only after the whole create-and-wait sequence
        // succeeded; on failure the caller still learns the server ID so
        // the resource can be cleaned up by hand.
        if let Err(source) = wait_for_action(api, created.action, &self.wait).await {
            return Err(Error::CreateIncomplete {
                server_id,
                source: Box::new(source),
            });
        }
        let Some(ip) = created.server.public_ipv4 else {
            return Err(Error::CreateIncomplete {
                server_id,
                source: Box::new(Error::Provider("server has no public IPv4 address".into())),
            });
        };

        self.server_id = Some(server_id);
        self.base.ip_address = Some(ip);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let api = self.api()?;
        let server = api.server_by_id(self.bound_server_id()?).await?;
        let action = api.power_on(server.id).await?;
        wait_for_action(api, action, &self.wait).await
    }

    async fn stop(&self) -> Result<()> {
        let api = self.api()?;
        let server = api.server_by_id(self.bound_server_id()?).await?;
        let action = api.shutdown(server.id).await?;
        wait_for_action(api, action, &self.wait).await
    }

    async fn restart(&self) -> Result<()> {
        let api = self.api()?;
        let server = api.server_by_id(self.bound_server_id()?).await?;
        let action = api.reboot(server.id).await?;
        wait_for_action(api, action, &self.wait).await
    }

    async fn kill(&self) -> Result<()> {
        let api = self.api()?;
        let server = api.server_by_id(self.bound_server_id()?).await?;
        let action = api.power_off(server.id).await?;
        wait_for_action(api, action, &self.wait).await
    }

    async fn remove(&self) -> Result<()> {
        let api = self.api()?;
        let server_id = self.bound_server_id()?;
        match api.server_by_id(server_id).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                warn!(server_id, "server already gone, nothing to remove");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        // Deletion has no intermediate state worth observing; no wait.
        api.delete_server(server_id).await
    }

    async fn state(&self) -> Result<MachineState> {
        let server = self.api()?.server_by_id(self.bound_server_id()?).await?;
        Ok(state::machine_state(server.status))
    }

    fn ip(&self) -> Result<String> {
        self.base.ip_address.clone().ok_or(Error::NotProvisioned)
    }

    async fn url(&self) -> Result<String> {
        must_be_running(self).await?;
        let ip = self.ip()?;
        Ok(format!("tcp://{ip}:{ENGINE_PORT}"))
    }
}
