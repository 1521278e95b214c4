use brokerbench::broker::{self, ShellRunner};
use brokerbench::config::{BrokerKind, ConfigError, TestMode};
use brokerbench::output::{ColorMode, OutputFormat};
use brokerbench::peer::Backend;
use brokerbench::{AdminServer, Config, SharedState, coordinator, create_formatter};

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "brokerbench")]
#[command(about = "Publish/subscribe broker throughput and latency benchmark")]
#[command(version)]
struct Cli {
    /// Path to configuration file. Defaults apply when omitted.
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Test mode (throughput, latency)
    #[arg(long)]
    test: Option<TestMode>,

    /// Broker family (kafka, rethinkdb, nsq, mock)
    #[arg(long)]
    broker: Option<BrokerKind>,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Messages sent by each publisher
    #[arg(long)]
    messages: Option<u64>,

    /// Payload size in throughput mode
    #[arg(long)]
    size: Option<usize>,

    /// Number of publishers
    #[arg(long)]
    publishers: Option<usize>,

    /// Number of subscribers
    #[arg(long)]
    subscribers: Option<usize>,

    /// Output format (clean, json, verbose, quiet)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Color mode (auto, always, never)
    #[arg(long)]
    color: Option<ColorMode>,

    /// Start and stop the broker with Docker around the run
    #[arg(long)]
    provision: bool,

    /// Listen address for the Prometheus endpoint
    #[arg(long)]
    listen: Option<SocketAddr>,
}

impl Cli {
    fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        let general = &mut config.general;
        if let Some(test) = self.test {
            general.test = test;
        }
        if let Some(messages) = self.messages {
            general.num_messages = messages;
        }
        if let Some(size) = self.size {
            general.message_size = size;
        }
        if let Some(publishers) = self.publishers {
            general.publishers = publishers;
        }
        if let Some(subscribers) = self.subscribers {
            general.subscribers = subscribers;
        }

        if let Some(kind) = self.broker {
            config.broker.kind = kind;
        }
        if let Some(ref host) = self.host {
            config.broker.host = host.clone();
        }
        if self.provision {
            config.broker.provision = true;
        }

        if let Some(format) = self.format {
            config.admin.format = format;
        }
        if let Some(color) = self.color {
            config.admin.color = color;
        }
        if self.listen.is_some() {
            config.admin.listen = self.listen;
        }

        config.validate()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config)?;

    let formatter = create_formatter(config.admin.format, config.admin.color);
    formatter.print_config(&config);

    let shared = Arc::new(SharedState::new());
    let handler_shared = Arc::clone(&shared);
    ctrlc::set_handler(move || {
        tracing::info!("interrupted, stopping workers");
        handler_shared.stop();
    })?;

    let mut admin = config
        .admin
        .listen
        .map(|addr| AdminServer::new(addr, Arc::clone(&shared)).run());

    let mut controller = broker::controller_for(&config.broker, Arc::new(ShellRunner));
    let result = coordinator::run(
        &config,
        Backend::from_kind(config.broker.kind),
        controller.as_mut(),
        Arc::clone(&shared),
        formatter.as_ref(),
    );

    shared.stop();
    if let Some(ref mut admin) = admin {
        admin.shutdown();
    }

    match result {
        Ok(report) => {
            formatter.print_results(&report);
            if report.incomplete() {
                return Err("run incomplete: one or more workers stopped early".into());
            }
            Ok(())
        }
        Err(e) => {
            formatter.print_failure(&e.to_string());
            Err(e.into())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_over_file() {
        let cli = Cli::parse_from([
            "brokerbench",
            "--test",
            "throughput",
            "--broker",
            "nsq",
            "--messages",
            "500",
            "--size",
            "64",
            "--publishers",
            "4",
            "--format",
            "json",
            "--provision",
        ]);
        let mut config = Config::parse("[broker]\nport = 5150\n").unwrap();
        cli.apply(&mut config).unwrap();

        assert_eq!(config.general.test, TestMode::Throughput);
        assert_eq!(config.broker.kind, BrokerKind::Nsq);
        assert_eq!(config.general.num_messages, 500);
        assert_eq!(config.general.message_size, 64);
        assert_eq!(config.general.publishers, 4);
        assert_eq!(config.general.subscribers, 1);
        assert_eq!(config.admin.format, OutputFormat::Json);
        assert!(config.broker.provision);
        assert_eq!(config.broker.port, 5150);
    }

    #[test]
    fn overrides_are_validated() {
        let cli = Cli::parse_from(["brokerbench", "--publishers", "0"]);
        let mut config = Config::default();
        assert!(cli.apply(&mut config).is_err());
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(Cli::try_parse_from(["brokerbench", "--broker", "zeromq"]).is_err());
        assert!(Cli::try_parse_from(["brokerbench", "--test", "soak"]).is_err());
    }
}
