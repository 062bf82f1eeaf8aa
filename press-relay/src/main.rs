use anyhow::{bail, Context, Result};
use clap::Parser;
use press_relay::server::{self, AppState};
use press_relay::sources::{self, Source};
use press_relay::{BroadcastHub, Cli, Command, EventStore, ExtractionProvider, Fetcher, Scheduler, Settings};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    cli.settings.validate()?;
    let sources = load_sources(&cli.settings)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Topics => {
            for source in &sources {
                println!("{}", source.topic());
            }
            Ok(())
        }
        Command::Check { topic, brief } => check(&cli.settings, &sources, &topic, brief).await,
        Command::RunOnce { topic } => run_once(&cli.settings, sources, &topic).await,
        Command::Serve => serve(&cli.settings, sources).await,
    }
}

fn load_sources(settings: &Settings) -> Result<Vec<Arc<Source>>> {
    let mut specs = if settings.no_builtin {
        Vec::new()
    } else {
        sources::builtin_specs()
    };

    if let Some(path) = &settings.sources {
        let extra = sources::load_specs(path)
            .with_context(|| format!("reading sources from {}", path.display()))?;
        specs.extend(extra);
    }

    if specs.is_empty() {
        bail!("no sources configured");
    }

    Ok(sources::build_sources(specs)?)
}

/// Store, hub and fetcher, built once and shared explicitly.
async fn open_core(settings: &Settings) -> Result<(Arc<EventStore>, Arc<BroadcastHub>, Arc<Fetcher>)> {
    let store = EventStore::open(&settings.database)
        .await
        .with_context(|| format!("opening store at {}", settings.database.display()))?;
    let store = Arc::new(store);
    let hub = Arc::new(BroadcastHub::new(store.clone(), settings.subscriber_buffer));
    let fetcher = Arc::new(Fetcher::new(settings.fetch_config())?);
    Ok((store, hub, fetcher))
}

fn build_scheduler(
    settings: &Settings,
    store: Arc<EventStore>,
    hub: Arc<BroadcastHub>,
    fetcher: Arc<Fetcher>,
    sources: Vec<Arc<Source>>,
) -> Scheduler {
    let providers: Vec<Arc<dyn ExtractionProvider>> = sources
        .into_iter()
        .map(|source| source as Arc<dyn ExtractionProvider>)
        .collect();

    let scheduler = Scheduler::new(store, hub, fetcher, providers, settings.poll_interval());
    match settings.retention() {
        Some(retention) => scheduler.with_retention(retention),
        None => scheduler,
    }
}

async fn check(settings: &Settings, sources: &[Arc<Source>], topic: &str, brief: bool) -> Result<()> {
    let source = sources
        .iter()
        .find(|s| s.topic() == topic)
        .with_context(|| format!("unknown topic {}", topic))?;
    let fetcher = Fetcher::new(settings.fetch_config())?;

    for mut item in source.list_candidates(&fetcher).await? {
        if !item.complete {
            info!("{}: scrape {}", topic, item.permalink);
            let completed = match source.fetch_raw(&fetcher, &item).await {
                Ok(raw) => source.complete_item(&mut item, &raw),
                Err(e) => Err(e),
            };
            if let Err(e) = completed {
                error!("{}: {} {}", topic, e, item.permalink);
                continue;
            }
        }

        let published = item
            .published_at
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());

        if brief {
            println!("{} {}", item.title, item.permalink);
        } else {
            println!("{}\n {}\n {}", item.title, published, item.permalink);
            println!();
            println!("{}", item.content);
            println!("------------------------------");
        }
    }

    Ok(())
}

async fn run_once(settings: &Settings, sources: Vec<Arc<Source>>, topic: &str) -> Result<()> {
    let (store, hub, fetcher) = open_core(settings).await?;
    for source in &sources {
        hub.register(source.topic()).await;
    }

    let scheduler = build_scheduler(settings, store.clone(), hub, fetcher, sources);
    let report = scheduler.run_once(topic).await;
    store.close().await;

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

async fn serve(settings: &Settings, sources: Vec<Arc<Source>>) -> Result<()> {
    let (store, hub, fetcher) = open_core(settings).await?;
    for source in &sources {
        hub.register(source.topic()).await;
    }

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;

    let shutdown = CancellationToken::new();
    let scheduler = Arc::new(build_scheduler(settings, store.clone(), hub.clone(), fetcher, sources));
    let pollers = scheduler.spawn(shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => error!("Cannot listen for shutdown signal: {}", e),
            }
        }
    });

    let served = server::serve(
        listener,
        AppState {
            hub,
            shutdown: shutdown.clone(),
        },
    )
    .await;

    shutdown.cancel();
    for poller in pollers {
        if let Err(e) = poller.await {
            error!("Poller ended abnormally: {}", e);
        }
    }
    store.close().await;

    served.context("stream server failed")?;
    info!("press-relay stopped");
    Ok(())
}
