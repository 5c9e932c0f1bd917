//! Wiring of the running daemon: brick, script runner and the two sockets.

use std::future::Future;
use std::sync::Arc;

use brick_communicator::{CommandServer, FsStorage, Messenger};
use brick_hal::{Brick, BrickConfig};
use brick_middleware::{Topic, TopicReceiver};
use brick_runtime::{ProcessScriptEngine, ScriptRunner};
use brick_types::{BrickError, EventPayload};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::Config;
use crate::telemetry_server::TelemetryServer;

pub struct Controller {
    brick: Arc<Brick>,
    runner: Arc<ScriptRunner>,
    server: CommandServer,
    telemetry: TelemetryServer,
    scripts: TopicReceiver,
    alerts: TopicReceiver,
}

impl Controller {
    /// Build the brick from `hardware` and everything that drives it.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Process`] if the script worker cannot start.
    pub fn new(cfg: &Config, hardware: BrickConfig) -> Result<Self, BrickError> {
        let brick = Arc::new(Brick::new(hardware));
        // Subscribe before anything can publish.
        let scripts = brick.event_bus().subscribe_to(Topic::Scripts);
        let alerts = brick.event_bus().subscribe_to(Topic::SystemAlerts);

        let engine = ProcessScriptEngine::new(
            cfg.interpreter.program.clone(),
            cfg.interpreter.args.clone(),
        );
        let runner = Arc::new(ScriptRunner::new(Arc::clone(&brick), Box::new(engine))?);
        let storage = Arc::new(FsStorage::new(&cfg.scripts_dir));
        let server =
            CommandServer::new(storage, Arc::clone(&runner) as _).with_port(cfg.communicator_port);
        let telemetry = TelemetryServer::new(Arc::clone(&brick)).with_port(cfg.telemetry_port);

        Ok(Self {
            brick,
            runner,
            server,
            telemetry,
            scripts,
            alerts,
        })
    }

    pub fn brick(&self) -> &Arc<Brick> {
        &self.brick
    }

    pub fn runner(&self) -> &Arc<ScriptRunner> {
        &self.runner
    }

    /// Serve until either listener fails, a script calls `quit`, or
    /// `shutdown` resolves.  Running scripts are aborted and the brick stopped on the
    /// way out.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), BrickError> {
        let Controller {
            brick: _,
            runner,
            server,
            telemetry,
            scripts,
            alerts,
        } = self;

        let errors = tokio::spawn(forward_script_errors(scripts, server.messenger()));
        let outcome = tokio::select! {
            served = server.run() => served,
            served = telemetry.run() => served,
            _ = wait_for_quit(alerts) => {
                info!("quit requested by script");
                Ok(())
            }
            _ = shutdown => {
                info!("shutdown requested");
                Ok(())
            }
        };

        errors.abort();
        // Also stops the brick.
        runner.abort();
        outcome
    }
}

/// Report failed scripts to every connected peer as `error: <message>`.
pub async fn forward_script_errors(mut scripts: TopicReceiver, messenger: Messenger) {
    loop {
        match scripts.recv().await {
            Ok(event) => {
                if let EventPayload::ScriptCompleted { script_id, error } = event.payload
                    && !error.is_empty()
                {
                    let peers = messenger.send_message(&format!("error: {error}"));
                    warn!(script_id, error = %error, peers, "script failed");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "script events dropped"),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Resolve once a [`EventPayload::Quit`] arrives or the bus goes away.
pub async fn wait_for_quit(mut alerts: TopicReceiver) {
    loop {
        match alerts.recv().await {
            Ok(event) if event.payload == EventPayload::Quit => return,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "system alerts dropped"),
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brick_communicator::{ScriptHost, Storage};
    use brick_middleware::EventBus;
    use brick_runtime::ScriptOrigin;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    struct IdleHost;

    impl ScriptHost for IdleHost {
        fn run(&self, _code: String, _origin: ScriptOrigin) -> u64 {
            0
        }

        fn abort(&self) {}
    }

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            communicator_port: 0,
            telemetry_port: 0,
            scripts_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn failed_script_is_reported_to_peers() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(dir.path()));
        let server = CommandServer::new(storage, Arc::new(IdleHost));
        let messenger = server.messenger();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(server.serve(listener));

        let events = EventBus::default();
        tokio::spawn(forward_script_errors(
            events.subscribe_to(Topic::Scripts),
            messenger.clone(),
        ));

        let mut client = TcpStream::connect(addr).await?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while messenger.peer_count() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(messenger.peer_count(), 1);

        events.publish(
            "test",
            EventPayload::ScriptCompleted {
                script_id: 1,
                error: String::new(),
            },
        );
        events.publish(
            "test",
            EventPayload::ScriptCompleted {
                script_id: 2,
                error: "motor M9 not found".to_string(),
            },
        );

        let mut buf = [0u8; 128];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf)).await??;
        assert_eq!(&buf[..n], b"error: motor M9 not found");
        Ok(())
    }

    #[tokio::test]
    async fn quit_ignores_other_alerts() -> Result<(), Box<dyn std::error::Error>> {
        let events = EventBus::default();
        let waiter = tokio::spawn(wait_for_quit(events.subscribe_to(Topic::SystemAlerts)));

        events.publish("test", EventPayload::BrickStopped);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        events.publish("test", EventPayload::Quit);
        tokio::time::timeout(Duration::from_secs(5), waiter).await??;
        Ok(())
    }

    #[tokio::test]
    async fn brick_quit_ends_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let controller = Controller::new(&test_config(dir.path()), BrickConfig::default())?;
        let brick = Arc::clone(controller.brick());
        let running = tokio::spawn(controller.run(std::future::pending()));

        brick.quit();
        tokio::time::timeout(Duration::from_secs(5), running).await???;
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_future_ends_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let controller = Controller::new(&test_config(dir.path()), BrickConfig::default())?;
        assert_eq!(controller.runner().pending(), 0);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            controller.run(tokio::time::sleep(Duration::from_millis(20))),
        )
        .await?;
        assert!(outcome.is_ok());
        Ok(())
    }
}
