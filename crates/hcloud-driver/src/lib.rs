//! Hetzner Cloud driver for the machine lifecycle framework.
//!
//! Translates the framework's lifecycle verbs (create, start, stop,
//! restart, kill, remove) into Hetzner Cloud API calls: named resources
//! are resolved first, mutating calls hand back asynchronous actions, and
//! each action is tracked to its terminal outcome before the operation
//! returns. State queries go through a fixed status table instead.

pub mod api;
pub mod driver;
pub mod state;
pub mod waiter;

pub use api::{CloudApi, HcloudApi};
pub use driver::{DEFAULT_IMAGE, DEFAULT_SERVER_TYPE, DRIVER_NAME, HcloudDriver};
pub use waiter::{WaitOptions, wait_for_action};
