//! Ambient background runtime pieces that aren't part of the request/turn
//! path proper: the built-in cron gateway scheduler.

pub mod cron;
