//! Shared type definitions for the natter P2P chat node.

pub mod constants;
pub mod error;
pub mod network;
pub mod primitives;
