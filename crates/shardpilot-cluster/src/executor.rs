//! Sequential plan execution with per-command retries.
//!
//! One command at a time: ship, await the reply, then sleep the
//! configured inter-step delay so the cluster's gossip state converges
//! before the next mutation. The transport is a capability so tests can
//! substitute an in-memory shipper.

use crate::client::{connection_info, transport_err};
use async_trait::async_trait;
use shardpilot_common::config::ExecutorSettings;
use shardpilot_common::{Endpoint, Error, Result};
use shardpilot_planner::{Plan, PlannedCommand};
use tracing::{info, warn};

/// The only reply that counts as success on the wire.
const OK: &str = "OK";

/// Ships one raw command to one endpoint and returns the reply verbatim.
#[async_trait]
pub trait CommandShipper {
    async fn ship(&self, endpoint: &Endpoint, command: &str) -> Result<String>;
}

/// Production shipper: opens a fresh connection to the target endpoint
/// per command. Plans are short and commands minutes apart, so pooling
/// would only keep idle sockets around.
pub struct RedisShipper {
    password: Option<String>,
}

impl RedisShipper {
    #[must_use]
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl CommandShipper for RedisShipper {
    async fn ship(&self, endpoint: &Endpoint, command: &str) -> Result<String> {
        let client = redis::Client::open(connection_info(
            &endpoint.host,
            endpoint.port,
            self.password.as_deref(),
        ))
        .map_err(transport_err)?;
        let mut conn = client.get_async_connection().await.map_err(transport_err)?;

        let mut parts = command.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| Error::invalid_plan_step("empty command"))?;
        let mut cmd = redis::cmd(name);
        for arg in parts {
            cmd.arg(arg);
        }
        cmd.query_async::<_, String>(&mut conn)
            .await
            .map_err(transport_err)
    }
}

/// Applies a plan to the cluster, one command at a time.
pub struct PlanExecutor<S> {
    shipper: S,
    settings: ExecutorSettings,
}

impl<S: CommandShipper> PlanExecutor<S> {
    #[must_use]
    pub fn new(shipper: S, settings: ExecutorSettings) -> Self {
        Self { shipper, settings }
    }

    /// Run the whole plan in order. Aborting between steps is safe; the
    /// remaining suffix stays valid as long as nothing else moves slots.
    pub async fn run(&self, plan: &Plan) -> Result<()> {
        let total = plan.len();
        for (index, command) in plan.commands().iter().enumerate() {
            info!(step = index + 1, total, "{}", command.message);
            self.execute(command).await?;
            if index + 1 < total {
                tokio::time::sleep(self.settings.step_delay).await;
            }
        }
        Ok(())
    }

    async fn execute(&self, command: &PlannedCommand) -> Result<()> {
        let wire = command.wire();
        let retry = self.settings.retry;
        for attempt in 1..=retry.attempts {
            match self.shipper.ship(&command.run_on, &wire).await {
                Ok(reply) if reply == OK => {
                    info!(endpoint = %command.run_on, command = %wire, "cluster answered OK");
                    return Ok(());
                }
                Ok(reply) => {
                    warn!(
                        endpoint = %command.run_on,
                        command = %wire,
                        %reply,
                        attempt,
                        attempts = retry.attempts,
                        "cluster did not accept command"
                    );
                }
                Err(err) => {
                    warn!(
                        endpoint = %command.run_on,
                        command = %wire,
                        %err,
                        attempt,
                        attempts = retry.attempts,
                        "command attempt failed"
                    );
                }
            }
            if attempt < retry.attempts {
                tokio::time::sleep(retry.backoff).await;
            }
        }
        Err(Error::CommandRejected {
            endpoint: command.run_on.clone(),
            command: wire,
            attempts: retry.attempts,
        })
    }
}
