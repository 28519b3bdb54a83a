//! Route handlers for the relay's HTTP surface

pub mod health;
