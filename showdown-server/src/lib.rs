//! Showdown: the live state engine behind a bracket-and-vote show.
//!
//! One authoritative [`core::ShowState`] is mutated by the admin console and
//! fanned out to three audiences (admin, big screen, voters) over WebSockets.

pub mod commands;
pub mod core;
