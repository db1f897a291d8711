//! Greenhouse clients.
//!
//! The two roles that talk to the broker:
//!
//! - [`NodeClient`]: a sensor/actuator node. Announces a [`NodeDevice`],
//!   reports [`NodeUpdate`]s and applies actuator commands to the device.
//! - [`PanelClient`]: a control panel. Dispatches broker messages to a
//!   [`PanelListener`], keeps a [`Topology`] and sends actuator commands.
//!
//! Both report a close initiated by the broker exactly once, and stay silent
//! about closes requested through their own `shutdown`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod node;
mod panel;
mod topology;
mod transport;

pub use error::ClientError;
pub use node::{NodeClient, NodeDevice, NodeUpdate};
pub use panel::{PanelClient, PanelEvent, PanelListener};
pub use topology::{NodeInfo, Topology};
pub use transport::{ClientConfig, open};
