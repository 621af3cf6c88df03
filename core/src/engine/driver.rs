use pl_actors::{Actor, Stopper};

use std::{future::IntoFuture, sync::Arc, time::Duration};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::remote::RemoteStore;

use super::{report_cycle, SyncEngine};

/// Runs a cycle right away and then once per `interval`, until stopped.
///
/// Cycles run one after the other on this task, and ticks that fire while a cycle is still
/// going are dropped rather than queued.
pub(crate) struct SyncDriver<S: RemoteStore> {
	pub(crate) engine: Arc<SyncEngine<S>>,
	pub(crate) interval: Duration,
}

impl<S: RemoteStore> Actor for SyncDriver<S> {
	const NAME: &'static str = "sync-driver";

	async fn run(self, stop: Stopper) {
		let device = self.engine.context().device;

		let mut ticker = interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		info!(%device, interval = ?self.interval, "Sync driver started");

		loop {
			tokio::select! {
				biased;
				() = (&stop).into_future() => break,
				_ = ticker.tick() => {}
			}

			tokio::select! {
				biased;
				() = (&stop).into_future() => {
					debug!(%device, "Stop requested mid-cycle, leaving the running git work to finish");
					break;
				}
				res = self.engine.run_cycle() => report_cycle(device, &res),
			}
		}

		info!(%device, "Sync driver stopped");
	}
}
