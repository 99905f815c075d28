//! Application layer of the control panel.
//!
//! - **`script`** – Parses interactive menu lines, builds the scripted demo
//!   run, and renders broker replies for the terminal.

pub mod script;
