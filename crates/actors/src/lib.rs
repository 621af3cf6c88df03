#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::dbg_macro,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Supervised long running background work.
//!
//! An [`Actor`] is spawned into a tokio task and handed a [`Stopper`]. The returned
//! [`ActorHandle`] is the only way to stop it: a stop signal is sent, the actor gets
//! [`STOP_TIMEOUT`] to return on its own, and is aborted otherwise. Panics inside the
//! actor are caught and logged instead of tearing down the runtime.

use std::{
	future::{Future, IntoFuture},
	panic::AssertUnwindSafe,
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
	time::Duration,
};

use async_channel as chan;
use futures::FutureExt;
use tokio::{spawn, task::JoinHandle, time::timeout};
use tracing::{debug, error, warn};

pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

pub trait Actor: Send + 'static {
	const NAME: &'static str;

	fn run(self, stop: Stopper) -> impl Future<Output = ()> + Send;
}

/// Handle to a running actor; dropping it without calling [`ActorHandle::stop`] detaches it.
#[derive(Debug)]
pub struct ActorHandle {
	name: &'static str,
	handle: JoinHandle<()>,
	stop_tx: chan::Sender<()>,
	is_running: Arc<AtomicBool>,
}

impl ActorHandle {
	pub fn spawn<A: Actor>(actor: A) -> Self {
		let (stop_tx, stop_rx) = chan::bounded(1);
		let is_running = Arc::new(AtomicBool::new(true));

		let handle = spawn({
			let is_running = Arc::clone(&is_running);

			async move {
				if AssertUnwindSafe(actor.run(Stopper(stop_rx)))
					.catch_unwind()
					.await
					.is_err()
				{
					error!(actor = A::NAME, "Actor unexpectedly panicked");
				}

				is_running.store(false, Ordering::Release);
				debug!(actor = A::NAME, "Actor finished");
			}
		});

		Self {
			name: A::NAME,
			handle,
			stop_tx,
			is_running,
		}
	}

	#[must_use]
	pub fn name(&self) -> &'static str {
		self.name
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.is_running.load(Ordering::Acquire)
	}

	pub async fn stop(self) {
		let Self {
			name,
			handle,
			stop_tx,
			is_running,
		} = self;

		if !is_running.load(Ordering::Acquire) {
			debug!(actor = name, "Actor already stopped");
		} else if stop_tx.send(()).await.is_err() {
			warn!(
				actor = name,
				"Failed to send stop signal to actor, will wait for it or abort"
			);
		}

		wait_stop_or_abort(name, handle).await;
	}
}

pub struct Stopper(chan::Receiver<()>);

impl Stopper {
	#[must_use]
	pub fn check_stop(&self) -> bool {
		self.0.try_recv().is_ok()
	}
}

pin_project_lite::pin_project! {
	pub struct StopActorFuture<'recv> {
		#[pin]
		fut: chan::Recv<'recv, ()>,
	}
}

impl Future for StopActorFuture<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();

		match this.fut.poll(cx) {
			Poll::Ready(res) => {
				if res.is_err() {
					warn!("Stop channel closed, will stop actor");
				}
				Poll::Ready(())
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

impl<'recv> IntoFuture for &'recv Stopper {
	type Output = ();
	type IntoFuture = StopActorFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		Self::IntoFuture { fut: self.0.recv() }
	}
}

async fn wait_stop_or_abort(name: &'static str, handle: JoinHandle<()>) {
	let abort_handle = handle.abort_handle();

	match timeout(STOP_TIMEOUT, handle).await {
		Ok(Ok(())) => {}
		Ok(Err(e)) => {
			// Panics are caught inside the actor task, so only cancellation lands here
			error!(actor = name, ?e, "Actor task failed to join");
		}
		Err(_) => {
			error!(
				actor = name,
				"Actor failed to gracefully stop in the allotted time, will force abortion"
			);
			abort_handle.abort();
		}
	}
}
