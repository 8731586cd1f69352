//! Samples a pool of known game servers and classifies each one: does it
//! accept unauthenticated ("cracked") logins, and does its whitelist hold
//! against a signed-in account?

pub mod auth;
pub mod config;
pub mod db;
pub mod model;
pub mod protocol;
pub mod scanner;

#[cfg(test)]
mod test_utils;
