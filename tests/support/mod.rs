#![allow(dead_code)]

pub mod fixture;
pub mod socket_guard;
