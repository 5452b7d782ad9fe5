//! Work dispatcher: the durable task queue consumer that drives the
//! whitelist request lifecycle. Reads one delivery at a time
//! (prefetch = 1), decodes it, dispatches by status to the matching
//! side effects, and acks or dead-letters accordingly. Reconnects to
//! the broker on disconnection; terminates fatally if reconnection
//! is exhausted.

mod commands;
mod decode;
mod error;
mod operators;

use std::collections::HashMap;
use std::sync::Arc;

use gk_cache::StatsCacheEngine;
use gk_common::{LifecycleStatus, Request, RequestUpdate};
use gk_config::ConfigHandle;
use gk_mailer::SmtpMailer;
use gk_queue::{Delivery, RabbitMqBroker};
use gk_rcon::RconClient;
use gk_store::RequestStore;
use gk_token::TokenCodec;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use error::{DispatcherError, Result};

use decode::{decode_delivery, Decoded};
use operators::select_operators;

pub struct Dispatcher {
    broker: RabbitMqBroker,
    cache: StatsCacheEngine,
    store: Arc<RequestStore>,
    rcon: RconClient,
    mailer: Arc<SmtpMailer>,
    token: Arc<TokenCodec>,
    config: ConfigHandle,
}

impl Dispatcher {
    pub fn new(
        broker: RabbitMqBroker,
        cache: StatsCacheEngine,
        store: Arc<RequestStore>,
        rcon: RconClient,
        mailer: Arc<SmtpMailer>,
        token: Arc<TokenCodec>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            broker,
            cache,
            store,
            rcon,
            mailer,
            token,
            config,
        }
    }

    /// Runs until `cancel` fires or broker reconnection is
    /// exhausted. One delivery is fully handled (side effects plus
    /// ack/nack) before the next is pulled, matching prefetch = 1.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let mut close_rx = self.broker.close_signal();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatcher received shutdown signal");
                    return Ok(());
                }
                _ = close_rx.changed() => {
                    if *close_rx.borrow() {
                        warn!("broker connection closed, reconnecting");
                        self.broker.reconnect().await.map_err(|e| {
                            error!(error = %e, "broker reconnection exhausted");
                            DispatcherError::Fatal
                        })?;
                        close_rx = self.broker.close_signal();
                    }
                }
                delivery = self.broker.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            if let Err(e) = self.handle_delivery(&delivery).await {
                                error!(error = %e, "failed to handle delivery");
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "broker delivery error");
                        }
                        None => {
                            warn!("broker consumer stream ended, reconnecting");
                            self.broker.reconnect().await.map_err(|e| {
                                error!(error = %e, "broker reconnection exhausted");
                                DispatcherError::Fatal
                            })?;
                            close_rx = self.broker.close_signal();
                        }
                    }
                }
            }
        }
    }

    async fn handle_delivery(&mut self, delivery: &Delivery) -> Result<()> {
        match decode_delivery(&delivery.body) {
            Ok(Decoded::Known(request)) => {
                let should_ack = self.dispatch(&request).await;
                if should_ack {
                    delivery.ack().await?;
                } else {
                    delivery.nack_no_requeue().await?;
                }
            }
            Ok(Decoded::UnknownStatus) => {
                delivery.ack().await?;
            }
            Err(e) => {
                warn!(error = %e, "malformed delivery body, routing to dead letter");
                delivery.nack_no_requeue().await?;
            }
        }
        Ok(())
    }

    /// Applies the common cache refresh/delta, then the per-status
    /// side effects, returning whether the delivery should be acked.
    async fn dispatch(&mut self, request: &Request) -> bool {
        if let Err(e) = self.cache.refresh_all_requests().await {
            error!(error = %e, id = %request.id, "failed to refresh all-requests snapshot");
        }
        if let Err(e) = self.cache.update_real_time(request).await {
            error!(error = %e, id = %request.id, "failed to update real-time stats");
        }

        match request.status {
            LifecycleStatus::Pending => self.handle_pending(request).await,
            LifecycleStatus::Approved => self.handle_approved(request).await,
            LifecycleStatus::Denied => self.handle_denied(request).await,
            LifecycleStatus::Banned => self.handle_banned(request).await,
            LifecycleStatus::Deactivated => self.handle_deactivated(request).await,
        }
    }

    async fn handle_pending(&mut self, request: &Request) -> bool {
        let config = self.config.current();

        let mut confirmation_data = HashMap::new();
        confirmation_data.insert("link".to_string(), commands::decision_link(&self.token, &request.id));
        if let Err(e) = self
            .mailer
            .send(&config.mail.confirmation_template, &confirmation_data, commands::CONFIRMATION_SUBJECT, &request.contact)
            .await
        {
            warn!(error = %e, id = %request.id, "failed to send confirmation mail");
        }

        let targets = select_operators(
            &config.dispatch.ops,
            config.dispatch.dispatching_strategy,
            config.dispatch.random_dispatching_threshold,
        );
        let subject = commands::operator_action_subject(&request.username);

        let mut assignees = Vec::new();
        for operator in &targets {
            let mut data = HashMap::new();
            data.insert(
                "link".to_string(),
                commands::operator_action_link(&self.token, &request.id, operator),
            );
            match self.mailer.send(&config.mail.operator_action_template, &data, &subject, operator).await {
                Ok(()) => assignees.push(operator.clone()),
                Err(e) => warn!(error = %e, operator = %operator, id = %request.id, "failed to send operator action mail"),
            }
        }

        if let Err(e) = self
            .store
            .update(
                &request.id,
                &RequestUpdate {
                    assignees: Some(assignees.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            error!(error = %e, id = %request.id, "failed to record assignees");
        }

        assignees.len() >= config.dispatch.min_required_receiver
    }

    async fn handle_approved(&mut self, request: &Request) -> bool {
        let rcon_ok = self.issue_rcon(&commands::whitelist_add(&request.username)).await;
        self.send_decision_mail(request, true).await;
        rcon_ok
    }

    async fn handle_denied(&mut self, request: &Request) -> bool {
        self.send_decision_mail(request, false).await;
        true
    }

    async fn handle_banned(&mut self, request: &Request) -> bool {
        self.issue_rcon(&commands::ban(&request.username)).await
    }

    async fn handle_deactivated(&mut self, request: &Request) -> bool {
        self.issue_rcon(&commands::whitelist_remove(&request.username)).await
    }

    async fn issue_rcon(&mut self, command: &str) -> bool {
        match self.rcon.send_command(command).await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, command, "remote-console command failed");
                false
            }
        }
    }

    async fn send_decision_mail(&self, request: &Request, approved: bool) {
        let config = self.config.current();
        let (template, subject) = if approved {
            (&config.mail.approved_template, commands::APPROVED_SUBJECT)
        } else {
            (&config.mail.denied_template, commands::DENIED_SUBJECT)
        };

        let mut data = HashMap::new();
        data.insert("link".to_string(), commands::decision_link(&self.token, &request.id));
        if let Err(e) = self.mailer.send(template, &data, subject, &request.contact).await {
            warn!(error = %e, id = %request.id, "failed to send decision mail");
        }
    }
}
