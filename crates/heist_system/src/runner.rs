//! Fixed-rate tick loop over a UDP endpoint.
//!
//! Every tick:
//!
//! 1. Drain the datagrams already queued on the socket.
//! 2. Dispatch each one on the session.
//! 3. Run the session's systems and deliver change events.
//! 4. Send everything queued in the outbox.

use std::future::Future;

use anyhow::{Context, Result};
use heist_net::{DispatchOutcome, Endpoint};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::{Session, StepReport};

/// Summary of one [`Runner::tick_once`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Datagrams read from the socket.
    pub received: usize,
    /// Datagrams whose handler ran successfully.
    pub dispatched: usize,
    /// Datagrams sent.
    pub sent: usize,
    /// Systems and change handlers.
    pub step: StepReport,
}

/// Drives a [`Session`] from a bound [`Endpoint`].
#[derive(Debug)]
pub struct Runner {
    session: Session,
    endpoint: Endpoint,
}

impl Runner {
    /// Bind the session's configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind(session: Session) -> Result<Self> {
        let addr = session.config().bind_addr;
        let endpoint = Endpoint::bind(addr, session.config().max_datagram)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self { session, endpoint })
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// The address actually bound (resolves port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Run one tick without waiting for the clock.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the socket fails. Failed sends are
    /// logged and skipped.
    pub async fn tick_once(&mut self) -> Result<TickReport> {
        let incoming = self.endpoint.drain().context("failed to read datagrams")?;
        let mut report = TickReport {
            received: incoming.len(),
            ..TickReport::default()
        };

        for datagram in &incoming {
            let outcome = self.session.receive(datagram.from, &datagram.bytes);
            if let DispatchOutcome::Dispatched(_) = outcome {
                report.dispatched += 1;
            }
        }

        report.step = self.session.step();

        for (target, bytes) in self.session.take_outgoing() {
            match self.endpoint.send_to(&bytes, target).await {
                Ok(()) => report.sent += 1,
                Err(err) => warn!(%target, error = %err, "send failed"),
            }
        }

        debug!(
            tick = report.step.tick,
            received = report.received,
            dispatched = report.dispatched,
            sent = report.sent,
            "tick complete"
        );
        Ok(report)
    }

    /// Tick at the configured rate until `max_ticks` is reached or
    /// `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Runner::tick_once`].
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let config = self.session.config().clone();
        let mut interval = tokio::time::interval(config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            session = %config.name,
            addr = %self.local_addr()?,
            tick_rate = config.tick_rate,
            max_ticks = config.max_ticks,
            "starting tick loop"
        );

        let mut ticks = 0_u64;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(session = %config.name, ticks, "shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_once().await?;
                    ticks += 1;
                    if config.max_ticks > 0 && ticks >= config.max_ticks {
                        info!(session = %config.name, ticks, "tick loop complete");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Tick until `max_ticks` or Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Runner::tick_once`].
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::config::SessionConfig;

    fn config(name: &str) -> SessionConfig {
        SessionConfig::new(name)
            .with_bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
            .with_tick_rate(500.0)
    }

    async fn runner(config: SessionConfig) -> Runner {
        Runner::bind(Session::new(config).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_run_stops_after_max_ticks() {
        let mut runner = runner(config("bounded").with_max_ticks(5)).await;
        runner.run_until(std::future::pending()).await.unwrap();
        assert_eq!(runner.session().tick(), 5);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut runner = runner(config("unbounded")).await;
        runner.run_until(async {}).await.unwrap();
        assert!(runner.session().tick() <= 1);
    }

    #[tokio::test]
    async fn test_taken_address_fails_to_bind() {
        let first = runner(config("first")).await;
        let taken = first.local_addr().unwrap();
        let second = Session::new(config("second").with_bind_addr(taken)).unwrap();
        assert!(Runner::bind(second).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_tick() {
        let mut runner = runner(config("idle")).await;
        let report = runner.tick_once().await.unwrap();
        assert_eq!(report.received, 0);
        assert_eq!(report.sent, 0);
        assert_eq!(report.step.tick, 1);
    }
}
