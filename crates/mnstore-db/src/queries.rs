//! Query functions organized by table.

pub mod chunks;
pub mod peers;
pub mod tickets;
