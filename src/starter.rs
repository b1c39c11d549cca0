//! Starter lifecycle
//!
//! Wires the connection manager, dispatcher, GPIO backend and trigger watcher
//! together and owns the long-running tasks:
//!
//! - dispatch loop: inbound commands, one at a time, in delivery order
//! - trigger loop: rising edges on the trigger pin become bus events
//! - supervisor: every `health_check_interval` asks the manager to reconnect
//!   when it is down and the transport is not recovering on its own

use crate::config::StarterConfig;
use crate::connection::policy::should_trigger_reconnect;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatch::{BusReplySink, CommandDispatcher};
use crate::error::{StarterError, StarterResult};
use crate::gpio::GpioBackend;
use crate::{connection_span, lifecycle_span};
use crate::observability::metrics::metrics;
use crate::transport::BusTransport;
use crate::trigger::{TriggerEvent, TriggerWatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

const TRIGGER_CHANNEL_CAPACITY: usize = 16;
/// How long shutdown waits for each task before aborting it
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct StarterLifecycle<T: BusTransport + 'static> {
    config: StarterConfig,
    /// `None` when the bus integration is disabled
    manager: Option<Arc<ConnectionManager<T>>>,
    gpio: GpioBackend,
    dispatcher: Arc<CommandDispatcher>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    started: bool,
}

impl<T: BusTransport + 'static> StarterLifecycle<T> {
    /// Build every component from configuration
    pub async fn new(config: StarterConfig, transport: T) -> StarterResult<Self> {
        let gpio = GpioBackend::open(&config.actuation_config()?).await?;
        info!(backend = ?gpio.kind(), "GPIO backend ready");

        let manager = if config.bus.enabled {
            let connection = config.connection_config()?;
            Some(Arc::new(
                ConnectionManager::new(connection, Arc::new(transport)).await,
            ))
        } else {
            warn!("Bus integration is disabled in configuration");
            None
        };

        Ok(Self::with_components(config, manager, gpio))
    }

    /// Assemble from prepared components
    pub fn with_components(
        config: StarterConfig,
        manager: Option<Arc<ConnectionManager<T>>>,
        gpio: GpioBackend,
    ) -> Self {
        let dispatcher = Self::build_dispatcher(&config, manager.as_ref(), &gpio);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            manager,
            gpio,
            dispatcher: Arc::new(dispatcher),
            shutdown_tx,
            tasks: Vec::new(),
            started: false,
        }
    }

    fn build_dispatcher(
        config: &StarterConfig,
        manager: Option<&Arc<ConnectionManager<T>>>,
        gpio: &GpioBackend,
    ) -> CommandDispatcher {
        let dispatcher = CommandDispatcher::new(gpio.executor(), config.general.client_id.clone());

        match (manager, &config.bus.reply_recipient) {
            (Some(manager), Some(recipient)) => {
                let sink = BusReplySink::new(
                    manager.clone(),
                    config.bus.subject_root.clone(),
                    config.publish_timeout(),
                );
                dispatcher.with_reply_sink(Arc::new(sink), recipient.clone())
            }
            (Some(_), None) => {
                info!("No reply recipient configured, command replies are disabled");
                dispatcher
            }
            (None, _) => dispatcher,
        }
    }

    /// Connect, subscribe and spawn the long-running tasks.
    ///
    /// A failed initial connection is logged; the supervisor keeps retrying.
    pub async fn start(&mut self) -> StarterResult<()> {
        if self.started {
            return Err(StarterError::internal("starter already started"));
        }
        info!(client_id = %self.config.general.client_id, "Starting dunebugger starter");

        if let Some(manager) = self.manager.clone() {
            let connected = manager
                .connect()
                .instrument(connection_span!(trigger = "startup"))
                .await;
            if !connected {
                error!("Initial bus connection failed, will keep retrying");
            }

            for subject in &self.config.bus.command_subjects {
                if manager.subscribe(subject).await {
                    info!(subject = %subject, "Subscribed to command subject");
                } else {
                    error!(subject = %subject, "Failed to subscribe to command subject");
                }
            }

            match manager.take_inbound() {
                Some(inbound) => {
                    let dispatcher = self.dispatcher.clone();
                    let shutdown_rx = self.shutdown_tx.subscribe();
                    self.tasks.push((
                        "dispatcher",
                        tokio::spawn(async move { dispatcher.run(inbound, shutdown_rx).await }),
                    ));
                }
                None => warn!("Inbound stream already taken, commands will not be dispatched"),
            }

            self.tasks.push((
                "supervisor",
                Self::spawn_supervisor(
                    manager,
                    self.config.health_check_interval(),
                    self.shutdown_tx.subscribe(),
                ),
            ));
        }

        if self.config.trigger.enabled {
            self.spawn_trigger_tasks();
        } else {
            info!("Trigger input disabled in configuration");
        }

        self.started = true;
        info!("Dunebugger starter started");
        Ok(())
    }

    fn spawn_trigger_tasks(&mut self) {
        let (events_tx, events_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);

        let watcher = TriggerWatcher::new(self.gpio.reader(), &self.config.trigger_config());
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.push((
            "trigger-watcher",
            tokio::spawn(watcher.run(events_tx, shutdown_rx)),
        ));

        let manager = self.manager.clone();
        let subject = self.config.bus.event_subject.clone();
        let message = self.config.bus.event_message.clone();
        let timeout = self.config.publish_timeout();
        info!(
            subject = %subject,
            message = %message,
            "Trigger events will be published"
        );

        self.tasks.push((
            "trigger-publisher",
            tokio::spawn(async move {
                let mut events_rx = events_rx;
                while let Some(event) = events_rx.recv().await {
                    publish_trigger_event(manager.as_deref(), event, &subject, &message, timeout)
                        .await;
                }
                debug!("Trigger publisher stopped");
            }),
        ));
    }

    /// Periodic connection check; the manager's throttle bounds the retry rate
    fn spawn_supervisor(
        manager: Arc<ConnectionManager<T>>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let span = lifecycle_span!(task = "supervisor");
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await; // First tick completes immediately, skip it

                loop {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = ticker.tick() => {
                            let state = manager.state();
                            if should_trigger_reconnect(state, manager.is_recovering()) {
                                info!(%state, "Bus not connected, attempting reconnection");
                                manager
                                    .connect()
                                    .instrument(connection_span!(trigger = "supervisor"))
                                    .await;
                            }
                        }
                    }
                }
                debug!("Supervisor stopped");
            }
            .instrument(span),
        )
    }

    /// Stop every task, disconnect and release the GPIO lines
    pub async fn shutdown(&mut self) -> StarterResult<()> {
        info!("Shutting down dunebugger starter");
        self.shutdown_tx.send_replace(true);

        // Cancels any connection backoff still in flight
        if let Some(manager) = &self.manager {
            manager.shutdown().await;
        }

        for (name, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout(TASK_SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "Task stopped"),
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => error!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        self.gpio.release().await;
        self.started = false;
        info!("Dunebugger starter stopped");
        Ok(())
    }

    pub fn client_id(&self) -> &str {
        &self.config.general.client_id
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn manager(&self) -> Option<&Arc<ConnectionManager<T>>> {
        self.manager.as_ref()
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        self.dispatcher.clone()
    }

    pub fn gpio(&self) -> &GpioBackend {
        &self.gpio
    }

    /// Connection state updates, `None` when the bus is disabled
    pub fn connection_state_watch(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.manager.as_ref().map(|manager| manager.watch_state())
    }
}

impl<T: BusTransport + 'static> Drop for StarterLifecycle<T> {
    fn drop(&mut self) {
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}

/// Publish the configured event for one trigger edge
pub async fn publish_trigger_event<T: BusTransport + 'static>(
    manager: Option<&ConnectionManager<T>>,
    event: TriggerEvent,
    subject: &str,
    message: &str,
    timeout: Duration,
) -> bool {
    metrics().trigger_fired();
    info!(pin = event.pin, "GPIO trigger detected on pin {}", event.pin);

    let Some(manager) = manager else {
        warn!("Bus integration disabled, trigger event not published");
        return false;
    };

    if !manager.is_connected() {
        error!("Cannot send message: not connected to bus");
        return false;
    }

    if manager.send(subject, message, timeout).await {
        metrics().event_published();
        info!(subject, message, "Trigger event published");
        true
    } else {
        error!(subject, "Failed to publish trigger event");
        false
    }
}
