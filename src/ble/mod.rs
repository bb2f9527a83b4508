//! BLE helpers independent of any radio stack.

pub mod adv_parser;
