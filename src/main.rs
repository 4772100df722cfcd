use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use tiny_sync::cli::{Cli, Command, ConfigCommand};
use tiny_sync::config::Settings;
use tiny_sync::dispatcher::{self, Dispatcher};
use tiny_sync::integrator::IntegratorClient;
use tiny_sync::logging;
use tiny_sync::operations::Context;
use tiny_sync::orchestrator::SyncOrchestrator;
use tiny_sync::store::{FsBlobStore, RedbStore, Store};
use tiny_sync::tiny::TinyClient;
use tiny_sync::ui::{self, TaskProgress};
use tiny_sync::webhook;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    logging::init(&settings.log, cli.verbose)?;

    let store = Arc::new(
        RedbStore::open(&settings.store_path)
            .with_context(|| format!("failed to open store {}", settings.store_path.display()))?,
    );

    let command = match cli.command {
        Command::Config(command) => return configure(store.as_ref(), command),
        command => command,
    };

    let ctx = Context {
        source: Arc::new(TinyClient::new(&settings.tiny_base_url, settings.http_timeout())?),
        integrator: Arc::new(IntegratorClient::new(
            &settings.integrator_base_url,
            &settings.integrator_auth_scheme,
            settings.http_timeout(),
        )?),
        store: store.clone(),
        blobs: Arc::new(FsBlobStore::new(&settings.media_root)),
    };
    let orchestrator = Arc::new(SyncOrchestrator::new(ctx));
    let dispatcher = Dispatcher::new(orchestrator.clone(), settings.retry.clone(), &settings.rate_limits()?);

    match command {
        Command::Serve => serve(&settings, store, dispatcher).await,
        Command::Recover => {
            let reset = orchestrator.recover()?;
            ui::done(&format!("{reset} order(s) released"));
            Ok(())
        }
        Command::DeleteOrder { id } => {
            let order = orchestrator.delete_order(id).await?;
            ui::done(&format!("order {order} deleted"));
            Ok(())
        }
        command => {
            let Some(task) = command.task() else {
                return Ok(());
            };
            let progress = TaskProgress::start(&task);
            let report = dispatcher.drain(task).await;
            if !progress.complete(&report) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn configure(store: &dyn Store, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Add(args) => {
            let configuration = store.add_configuration(args.into())?;
            ui::done(&format!("{configuration} added with id {}", configuration.id));
        }
        ConfigCommand::List => ui::print_configurations(&store.configurations()?),
        ConfigCommand::Disable { id } => {
            store.set_configuration_active(id, false)?;
            ui::done(&format!("configuration {id} disabled"));
        }
    }
    Ok(())
}

async fn serve(settings: &Settings, store: Arc<RedbStore>, dispatcher: Dispatcher) -> Result<()> {
    let reset = dispatcher.orchestrator().recover()?;
    info!(reset, "startup recovery done");

    let (stop, shutdown) = watch::channel(false);
    let (sender, receiver) = dispatcher::queue();

    let worker = tokio::spawn(dispatcher.run(receiver, sender.clone(), shutdown.clone()));
    let scheduler = tokio::spawn(dispatcher::run_scheduler(
        sender,
        dispatcher::scheduled_tasks(&settings.schedule),
        shutdown.clone(),
    ));

    let listener = TcpListener::bind(&settings.webhook_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.webhook_addr))?;
    info!(addr = %settings.webhook_addr, "webhook receiver listening");

    let mut server_shutdown = shutdown;
    let server = axum::serve(listener, webhook::router(store)).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });
    let server = tokio::spawn(async move { server.await });

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    let _ = stop.send(true);

    if let Err(e) = server.await? {
        error!("webhook server error: {e}");
    }
    scheduler.await?;
    worker.await??;
    Ok(())
}
