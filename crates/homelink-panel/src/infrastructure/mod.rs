//! Infrastructure layer of the control panel: the broker client.

pub mod client;
