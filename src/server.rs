//! The TCP listener: accepts inbound connections and hands each one to
//! `session::run` as its own task.
//!
//! Accepts are bounded by a semaphore and retried with exponential
//! backoff on transient errors. Every session task is owned directly in
//! a `JoinSet`, so shutdown means "stop accepting, cancel every tracked
//! task, join them all" with no separate reaper and no implicit reaping
//! through channel closure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::Core;
use crate::session;

/// Tracks how many sessions are currently alive, for the
/// accepted-minus-reaped invariant. Incremented on accept, decremented
/// exactly once via `AliveGuard`'s `Drop`.
struct AliveGuard(Arc<AtomicU64>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs the ip-communicator: binds `core.config().port`, accepts
/// connections until `shutdown` resolves, then cancels and joins every
/// outstanding session task before returning.
pub async fn run(core: Arc<Core>, shutdown: impl std::future::Future<Output = ()>) -> crate::error::Result<()> {
    let addr = ("0.0.0.0", core.config().port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| crate::error::RivError::InternalError(format!("bind failed: {err}")))?;
    info!(port = core.config().port, "ip-communicator listening");

    let cancel = CancellationToken::new();
    let limit_connections = Arc::new(Semaphore::new(core.config().max_connections));
    let alive = Arc::new(AtomicU64::new(0));
    let mut tasks = JoinSet::new();

    tokio::select! {
        res = accept_loop(&listener, core.clone(), limit_connections.clone(), alive.clone(), cancel.clone(), &mut tasks) => {
            if let Err(err) = res {
                error!(cause = %err, "accept loop failed permanently");
            }
        }
        _ = shutdown => {
            info!("ip-communicator shutting down");
        }
    }

    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    Ok(())
}

async fn accept_loop(
    listener: &TcpListener,
    core: Arc<Core>,
    limit_connections: Arc<Semaphore>,
    alive: Arc<AtomicU64>,
    cancel: CancellationToken,
    tasks: &mut JoinSet<()>,
) -> crate::error::Result<()> {
    loop {
        // Permits are forgotten here and re-added by the session task on
        // exit: the permit's lifetime does not match the lexical scope
        // that acquired it, so it can't be held as a guard value.
        let permit = limit_connections
            .acquire()
            .await
            .expect("semaphore is never closed");
        permit.forget();

        let socket = match accept_with_backoff(listener, &cancel).await {
            Some(Ok(socket)) => socket,
            Some(Err(err)) => {
                limit_connections.add_permits(1);
                return Err(err);
            }
            None => {
                limit_connections.add_permits(1);
                return Ok(());
            }
        };

        alive.fetch_add(1, Ordering::SeqCst);
        let guard = AliveGuard(alive.clone());
        let limit = limit_connections.clone();
        let core = core.clone();

        tasks.spawn(async move {
            let _guard = guard;
            session::run(socket, core).await;
            limit.add_permits(1);
        });
    }
}

/// Accepts one connection, retrying transient errors with doubling
/// backoff (1s, 2s, 4s, ... up to 64s) across six attempts before giving
/// up. Returns `None` if cancellation fires first.
async fn accept_with_backoff(
    listener: &TcpListener,
    cancel: &CancellationToken,
) -> Option<crate::error::Result<TcpStream>> {
    let mut backoff = 1u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            res = listener.accept() => {
                match res {
                    Ok((socket, _)) => return Some(Ok(socket)),
                    Err(err) => {
                        if backoff > 64 {
                            return Some(Err(crate::error::RivError::InternalError(format!(
                                "accept failed repeatedly: {err}"
                            ))));
                        }
                    }
                }
            }
        }

        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}
