//! Ping supervision for the persistent channel connections.
//!
//! Every interval, each connection that has been heard from since the last
//! sweep gets its flag cleared and a ping queued. One that stayed silent for
//! a whole interval after its ping is terminated at once, without waiting
//! for its outbound queue to drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::broadcast_router::{Outbound, RouterHandle};

pub const PING_INTERVAL: Duration = Duration::from_secs(30);

pub struct LivenessMonitor {
    routers: Vec<RouterHandle>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(routers: Vec<RouterHandle>) -> Self {
        Self {
            routers,
            interval: PING_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for router in &self.routers {
                    sweep(router);
                }
            }
        })
    }
}

/// One liveness pass over a channel. Returns the number of terminations.
pub fn sweep(router: &RouterHandle) -> usize {
    let mut terminated = 0;
    router.connections().retain(|id, conn| {
        if conn.take_alive() {
            return conn.send(Outbound::Ping);
        }
        log::info!("Terminating unresponsive {} client {}", router.kind(), id);
        conn.terminate();
        terminated += 1;
        false
    });
    terminated
}
