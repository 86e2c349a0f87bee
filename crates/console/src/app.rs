//! Wiring of the console: listener registration, store and dispatch.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use tracing::{debug, info};

use conduit_core::{ListenerId, SubscriptionId};
use conduit_events::{EventStore, Listener, Repository, SubscriptionFilter};
use conduit_infra::{EventSourcedRepository, FileEventStore, ListenerFactories, StoreUnitOfWork};

use crate::cli::{Cli, Command};
use crate::commands::{SubscriptionCommands, start_subscription};
use crate::error::Result;
use crate::output::OutputMultiplexer;
use crate::runner::SingleSubscriptionRunner;
use crate::supervisor::{OsLauncher, WorkerProcessSupervisor};

#[derive(Debug, Default)]
pub struct ConsoleBuilder {
    listeners: ListenerFactories,
}

impl ConsoleBuilder {
    /// Register a listener type together with its id type.
    pub fn listener<I, L, F>(mut self, factory: F) -> Self
    where
        I: ListenerId,
        L: Listener + 'static,
        F: Fn(I) -> L + Send + Sync + 'static,
    {
        self.listeners.register(factory);
        self
    }

    pub fn build(self) -> Console {
        Console {
            listeners: Arc::new(self.listeners),
        }
    }
}

/// The `conduit` commands over a set of registered listener types.
#[derive(Debug)]
pub struct Console {
    listeners: Arc<ListenerFactories>,
}

impl Console {
    pub fn builder() -> ConsoleBuilder {
        ConsoleBuilder::default()
    }

    /// Run `cli` against the file event store it names, on stdout/stderr.
    pub fn run(&self, cli: &Cli) -> Result<()> {
        let store = Arc::new(FileEventStore::open(&cli.store)?);
        debug!(store = %cli.store.display(), "event store opened");

        let interactive = io::stdout().is_terminal();
        self.execute(cli, store, &mut io::stdout(), &mut io::stderr(), interactive)
    }

    pub fn execute<O, E>(
        &self,
        cli: &Cli,
        store: Arc<dyn EventStore>,
        out: &mut O,
        err: &mut E,
        interactive: bool,
    ) -> Result<()>
    where
        O: Write,
        E: Write,
    {
        let repository = EventSourcedRepository::new(store.clone(), self.listeners.clone());
        let identifiers = self.listeners.identifiers();
        let commands = SubscriptionCommands::new(identifiers, &repository);

        match &cli.command {
            Command::RunSubscription(args) => {
                let config = args.processing.runner_config()?;
                let runner =
                    SingleSubscriptionRunner::new(identifiers, &repository, store.as_ref(), config);
                runner.run(
                    &args.target.kind,
                    &args.target.id,
                    StoreUnitOfWork::new(store.clone()),
                    out,
                )?;
            }
            Command::RunSubscriptions(args) => {
                let config = cli.supervisor_config(args)?;
                let filter = SubscriptionFilter::new()
                    .with_kinds(args.types.iter().cloned())
                    .including_completed(args.include_completed);
                let subscriptions: Vec<SubscriptionId> = repository
                    .all(&filter)?
                    .iter()
                    .map(|s| s.subscription_id().clone())
                    .collect();
                info!(
                    subscriptions = subscriptions.len(),
                    limit = config.concurrency_limit,
                    "running subscriptions"
                );

                let output = OutputMultiplexer::new(out, interactive);
                WorkerProcessSupervisor::new(OsLauncher, config, output).run(subscriptions)?;
            }
            Command::PauseSubscription(target) => {
                commands.pause(&target.kind, &target.id, out, err)?;
            }
            Command::UnpauseSubscription(target) => {
                commands.unpause(&target.kind, &target.id, out, err)?;
            }
            Command::RestartSubscription(target) => {
                commands.restart(&target.kind, &target.id, out, err)?;
            }
            Command::RestartSubscriptions { types } => {
                commands.restart_all(types, out)?;
            }
            Command::StartSubscription(target) => {
                start_subscription(&repository, &target.kind, &target.id, out)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use conduit_core::{ExpectedVersion, StreamName};
    use conduit_events::{ListenerError, StoredEvent, SubscriptionState, UncommittedEvent};
    use conduit_infra::{InMemoryEventStore, SubscriptionEvent};

    use super::*;
    use crate::error::ConsoleError;
    use crate::logger::{LoggerId, LoggerListener};
    use crate::runner::RunError;

    conduit_core::uuid_listener_id!(struct FlakyId => "flaky");

    /// Fails on the event whose payload has `"line": 2`.
    struct FlakyListener;

    impl Listener for FlakyListener {
        fn on(&mut self, event: &StoredEvent) -> std::result::Result<(), ListenerError> {
            if event.payload()["line"] == 2 {
                return Err(ListenerError::failed("line 2 rejected"));
            }
            Ok(())
        }
    }

    fn console() -> Console {
        Console::builder()
            .listener(LoggerListener::new)
            .listener(|_: FlakyId| FlakyListener)
            .build()
    }

    fn store_with_events(n: usize) -> Arc<InMemoryEventStore> {
        let store = Arc::new(InMemoryEventStore::new());
        let events = (0..n)
            .map(|i| UncommittedEvent::new("order.placed", serde_json::json!({ "line": i })))
            .collect();
        store
            .append(&StreamName::new("order-1"), events, ExpectedVersion::Any)
            .unwrap();
        store
    }

    fn execute(console: &Console, store: &Arc<InMemoryEventStore>, args: &[&str]) -> (Result<()>, String, String) {
        let cli = Cli::try_parse_from(std::iter::once("conduit").chain(args.iter().copied())).unwrap();
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let result = console.execute(&cli, store.clone(), &mut out, &mut err, false);
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn started_subscription_runs_and_keeps_its_position() {
        let console = console();
        let store = store_with_events(3);
        let id = LoggerId::new().to_string();

        let (result, out, _) = execute(&console, &store, &["start-subscription", "logger", id.as_str()]);
        result.unwrap();
        assert_eq!(out, format!("Subscription logger({id}) started.\n"));

        let (result, out, _) = execute(
            &console,
            &store,
            &["run-subscription", "logger", id.as_str(), "--commit-threshold", "2"],
        );
        result.unwrap();
        assert!(out.ends_with(&format!(
            "Subscription logger({id}) processed    3 events in < 1 sec.\n"
        )));

        let (result, out, _) = execute(&console, &store, &["run-subscription", "logger", id.as_str()]);
        result.unwrap();
        assert!(out.ends_with("processed    0 events in < 1 sec.\n"));
    }

    #[test]
    fn pause_and_unpause_are_durable() {
        let console = console();
        let store = store_with_events(1);
        let id = LoggerId::new().to_string();
        execute(&console, &store, &["start-subscription", "logger", id.as_str()]).0.unwrap();

        let (result, out, _) = execute(&console, &store, &["pause-subscription", "logger", id.as_str()]);
        result.unwrap();
        assert_eq!(out, format!("Subscription logger({id}) pausing succeeded.\n"));

        let repository = EventSourcedRepository::new(store.clone(), console.listeners.clone());
        let subscription_id = SubscriptionId::new("logger", id.clone());
        let paused = repository.find(&subscription_id).unwrap().unwrap();
        assert_eq!(paused.state(), SubscriptionState::Paused);

        let (result, _, err) = execute(&console, &store, &["pause-subscription", "logger", id.as_str()]);
        assert!(matches!(result, Err(ConsoleError::Command(_))));
        assert_eq!(err, format!("Subscription logger({id}) pausing failed.\n"));

        execute(&console, &store, &["unpause-subscription", "logger", id.as_str()]).0.unwrap();
        let running = repository.find(&subscription_id).unwrap().unwrap();
        assert_eq!(running.state(), SubscriptionState::Running);
    }

    #[test]
    fn restart_of_a_logger_succeeds() {
        let console = console();
        let store = store_with_events(2);
        let id = LoggerId::new().to_string();
        execute(&console, &store, &["start-subscription", "logger", id.as_str()]).0.unwrap();
        execute(&console, &store, &["run-subscription", "logger", id.as_str()]).0.unwrap();

        let (result, out, _) = execute(&console, &store, &["restart-subscriptions"]);
        result.unwrap();
        assert_eq!(out, format!("Subscription logger({id}) restart succeeded.\n"));

        let (result, out, _) = execute(&console, &store, &["run-subscription", "logger", id.as_str()]);
        result.unwrap();
        assert!(out.ends_with("processed    2 events in < 1 sec.\n"));
    }

    #[test]
    fn unknown_subscription_is_reported_not_failed() {
        let console = console();
        let store = store_with_events(0);
        let id = LoggerId::new().to_string();

        let (result, out, _) = execute(&console, &store, &["run-subscription", "logger", id.as_str()]);

        result.unwrap();
        assert_eq!(out, format!("Subscription logger({id}) not found.\n"));
    }

    #[test]
    fn malformed_input_fails() {
        let console = console();
        let store = store_with_events(0);

        let (result, _, _) = execute(&console, &store, &["run-subscription", "logger", "not-an-uuid"]);
        assert!(matches!(
            result,
            Err(ConsoleError::Run(RunError::InvalidIdentifier(_)))
        ));

        let id = LoggerId::new().to_string();
        let (result, _, _) = execute(
            &console,
            &store,
            &["run-subscription", "logger", id.as_str(), "--commit-threshold=0"],
        );
        assert!(matches!(result, Err(ConsoleError::Config(_))));
    }

    #[test]
    fn failing_listener_leaves_the_subscription_paused_at_its_last_commit() {
        let console = console();
        let store = store_with_events(5);
        let id = FlakyId::new().to_string();
        execute(&console, &store, &["start-subscription", "flaky", id.as_str()]).0.unwrap();

        let (result, _, _) = execute(
            &console,
            &store,
            &["run-subscription", "flaky", id.as_str(), "--pause-on-error", "--commit-threshold=2"],
        );
        let err = result.unwrap_err();
        assert!(matches!(err, ConsoleError::Run(RunError::Processing { .. })));
        assert!(err.to_string().contains("line 2 rejected"));

        let subscription_id = SubscriptionId::new("flaky", id.clone());
        let repository = EventSourcedRepository::new(store.clone(), console.listeners.clone());
        let reloaded = repository.find(&subscription_id).unwrap().unwrap();
        assert_eq!(reloaded.state(), SubscriptionState::Paused);

        let lifecycle: Vec<SubscriptionEvent> = store
            .load_stream(&subscription_id.stream_name())
            .unwrap()
            .iter()
            .map(|e| serde_json::from_value(e.payload().clone()).unwrap())
            .collect();
        assert_eq!(
            lifecycle[1..],
            [
                SubscriptionEvent::EventProcessed { position: 1 },
                SubscriptionEvent::EventProcessed { position: 2 },
                SubscriptionEvent::Paused,
            ]
        );
    }
}
