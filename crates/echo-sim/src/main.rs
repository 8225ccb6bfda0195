mod events;

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use clap::Parser;
use echo_mailbox::{
    BrokerMailbox, DataSharingMethod, DeviceId, FormatFamily, LocalBroker, LocalClient, Mailbox,
    MailboxConfig, NeighborsData, Path, RoundEnvelope,
};
use events::{emit, EventError, EventLeft, EventRound, EventStarted, EventSummary};

/// Path under which each device shares the set of devices it can see.
const NEIGHBORING: &str = "neighboring";

#[derive(Parser)]
#[command(
    name = "echo-sim",
    about = "Run Echo devices against an in-process broker and report nearby devices"
)]
struct Cli {
    /// Number of simulated devices.
    #[arg(long, default_value = "3")]
    devices: usize,

    /// Number of rounds to evaluate.
    #[arg(long, default_value = "10")]
    rounds: u32,

    /// Delay between rounds in ms.
    #[arg(long, default_value = "1000")]
    round_ms: u64,

    /// Retention window in ms.
    #[arg(long, default_value = "5000")]
    retention_ms: u64,

    /// Heartbeat cadence in ms.
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,

    /// Wire format: json or msgpack.
    #[arg(long, default_value = "json")]
    format: FormatFamily,

    /// Topic namespace.
    #[arg(long, default_value = echo_mailbox::DEFAULT_NAMESPACE)]
    namespace: String,

    /// Close the last device after this round, to watch it expire.
    #[arg(long)]
    leave_after: Option<u32>,
}

struct Device {
    id: DeviceId,
    mailbox: BrokerMailbox<LocalClient>,
    active: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(cli.devices > 0, "--devices must be at least 1");

    tracing::info!(devices = cli.devices, rounds = cli.rounds, format = %cli.format, "starting simulation");
    let broker = LocalBroker::new();
    let mut devices = Vec::with_capacity(cli.devices);
    for _ in 0..cli.devices {
        let config = MailboxConfig::new()
            .namespace(cli.namespace.clone())
            .format(cli.format)
            .retention(Duration::from_millis(cli.retention_ms))
            .heartbeat_interval(Duration::from_millis(cli.heartbeat_ms));
        let id = config.get_device_id();
        let mailbox = BrokerMailbox::connect(config, broker.client()).await?;
        devices.push(Device {
            id,
            mailbox,
            active: true,
        });
    }

    emit(&EventStarted::new(
        devices.iter().map(|d| d.id.to_string()).collect(),
        &cli.format.to_string(),
        &cli.namespace,
        cli.retention_ms,
    ));

    // Let a first wave of heartbeats go around.
    tokio::time::sleep(Duration::from_millis(cli.heartbeat_ms.saturating_mul(2))).await;

    let start = Instant::now();
    let mut messages_sent = 0;
    let mut errors = 0u32;
    for round in 1..=cli.rounds {
        for device in devices.iter().filter(|d| d.active) {
            match run_round(&device.mailbox).await {
                Ok((neighbors, seen_by, sent)) => {
                    messages_sent += sent;
                    emit(&EventRound::new(
                        round,
                        device.id.to_string(),
                        to_strings(&neighbors),
                        to_strings(&seen_by),
                        sent,
                    ));
                }
                Err(e) => {
                    errors += 1;
                    emit(&EventError::new(device.id.to_string(), &e.to_string()));
                }
            }
        }

        if cli.leave_after == Some(round) {
            if let Some(device) = devices.iter_mut().rev().find(|d| d.active) {
                tracing::info!(device = %device.id, round, "device leaving");
                device.mailbox.close().await;
                device.active = false;
                emit(&EventLeft::new(round, device.id.to_string()));
            }
        }

        if round < cli.rounds {
            tokio::time::sleep(Duration::from_millis(cli.round_ms)).await;
        }
    }

    for device in &devices {
        device.mailbox.close().await;
    }

    emit(&EventSummary::new(
        cli.rounds,
        messages_sent,
        errors,
        start.elapsed().as_secs_f64(),
    ));
    Ok(())
}

/// The "nearby devices" program: read which neighbors reported this device
/// last round, then share the current neighbor set.
async fn run_round(
    mailbox: &BrokerMailbox<LocalClient>,
) -> anyhow::Result<(BTreeSet<DeviceId>, BTreeSet<DeviceId>, usize)> {
    let path = Path::new(NEIGHBORING);
    let reported: HashMap<DeviceId, BTreeSet<DeviceId>> = mailbox
        .current_inbound()
        .data_at(&path, DataSharingMethod::Serialize)?;
    let me = mailbox.device_id();
    let seen_by = reported
        .into_iter()
        .filter(|(_, seen)| seen.contains(&me))
        .map(|(id, _)| id)
        .collect();

    let neighbors = mailbox.neighbors();
    let envelope = RoundEnvelope::new().share(path, neighbors.clone());
    let sent = mailbox.deliverable_for(&envelope).await?;
    Ok((neighbors, seen_by, sent))
}

fn to_strings(ids: &BTreeSet<DeviceId>) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}
