//! One-shot commands against the message store and channel adapters.

use std::{io::Read, path::PathBuf, sync::Arc};

use {
    anyhow::{Context, bail},
    chrono::{DateTime, Utc},
    clap::Args,
    courier_common::{ChannelType, Metadata, ScheduledFilter},
    courier_config::CourierConfig,
    courier_dispatch::{DispatchService, MEMORY_STORE_URL, SendNowRequest, build_service},
    courier_email::outbound::SUBJECT_KEY,
    courier_scheduler::{NoopNotifier, ScheduleRequest},
    serde::Serialize,
    tracing::warn,
};

#[derive(Args, Clone, Debug)]
pub struct MessageArgs {
    /// Channel to send through (sms, chat, email).
    #[arg(short, long)]
    channel: ChannelType,
    /// Recipient address for the channel.
    #[arg(long)]
    to: String,
    /// Message text.
    #[arg(short, long)]
    message: String,
    /// Sender override, when the channel allows one.
    #[arg(long)]
    from: Option<String>,
    /// Email subject.
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    contact_id: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    team_id: Option<String>,
}

impl MessageArgs {
    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(subject) = &self.subject {
            metadata.insert(SUBJECT_KEY.into(), subject.clone().into());
        }
        metadata
    }
}

#[derive(Args, Clone, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    message: MessageArgs,
}

#[derive(Args, Clone, Debug)]
pub struct ScheduleArgs {
    #[command(flatten)]
    message: MessageArgs,
    /// Delivery time (RFC 3339).
    #[arg(long, conflicts_with = "in_secs", required_unless_present = "in_secs")]
    at: Option<DateTime<Utc>>,
    /// Delivery delay in seconds from now.
    #[arg(long)]
    in_secs: Option<u64>,
}

impl ScheduleArgs {
    fn delivery_time(&self, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        match (self.at, self.in_secs) {
            (Some(at), _) => Ok(at),
            (None, Some(secs)) => {
                let secs = i64::try_from(secs).context("--in-secs is too large")?;
                Ok(now + chrono::Duration::seconds(secs))
            },
            (None, None) => bail!("either --at or --in-secs is required"),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[arg(long)]
    contact_id: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    team_id: Option<String>,
    /// Output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct IngestArgs {
    /// Channel the webhook came from.
    #[arg(short, long)]
    channel: ChannelType,
    /// JSON payload file. Reads stdin when omitted.
    path: Option<PathBuf>,
}

async fn open(config: &CourierConfig) -> anyhow::Result<DispatchService> {
    Ok(build_service(config, Arc::new(NoopNotifier)).await?)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn handle_channels(config: &CourierConfig, json: bool) -> anyhow::Result<()> {
    let service = open(config).await?;
    let channels = service.channel_info();
    if json {
        return print_json(&channels);
    }
    for info in &channels {
        let mark = if info.enabled {
            "enabled"
        } else {
            "disabled"
        };
        match &info.capabilities {
            Some(caps) => println!(
                "  {:<6} {:<9} {} ({:.4}/msg, {:.1}% reliable, {:?})",
                info.channel,
                mark,
                caps.display_name,
                caps.cost_per_unit,
                caps.reliability_pct,
                caps.latency_class
            ),
            None => println!("  {:<6} {mark}", info.channel),
        }
    }
    Ok(())
}

pub async fn handle_send(config: &CourierConfig, args: SendArgs) -> anyhow::Result<()> {
    let service = open(config).await?;
    let metadata = args.message.metadata();
    let MessageArgs {
        channel,
        to,
        message,
        from,
        contact_id,
        user_id,
        team_id,
        ..
    } = args.message;

    let result = service
        .send_now(SendNowRequest {
            channel,
            to,
            content: message,
            from,
            contact_id,
            user_id,
            team_id,
            metadata,
        })
        .await;
    print_json(&result)?;
    if !result.success {
        bail!(
            "send failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub async fn handle_schedule(config: &CourierConfig, args: ScheduleArgs) -> anyhow::Result<()> {
    if config.storage.database_url.trim() == MEMORY_STORE_URL {
        warn!("in-memory store: the scheduled message is lost when this command exits");
    }
    let service = open(config).await?;
    let at = args.delivery_time(Utc::now())?;
    let metadata = args.message.metadata();
    let MessageArgs {
        channel,
        to,
        message,
        from,
        contact_id,
        user_id,
        team_id,
        ..
    } = args.message;

    let id = service
        .schedule(ScheduleRequest {
            channel,
            to,
            content: message,
            from,
            scheduled_at: at,
            contact_id,
            user_id,
            team_id,
            metadata,
        })
        .await?;
    print_json(&serde_json::json!({ "messageId": id, "scheduledAt": at }))
}

pub async fn handle_cancel(config: &CourierConfig, id: &str) -> anyhow::Result<()> {
    let service = open(config).await?;
    if !service.cancel_scheduled(id).await? {
        bail!("no message with id {id}");
    }
    println!("Cancelled {id}.");
    Ok(())
}

pub async fn handle_list(config: &CourierConfig, args: ListArgs) -> anyhow::Result<()> {
    let service = open(config).await?;
    let filter = ScheduledFilter {
        contact_id: args.contact_id,
        user_id: args.user_id,
        team_id: args.team_id,
    };
    let scheduled = service.list_scheduled(&filter).await?;
    if args.json {
        return print_json(&scheduled);
    }
    if scheduled.is_empty() {
        println!("No scheduled messages.");
        return Ok(());
    }
    for entry in &scheduled {
        let at = entry
            .scheduled_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!("  {}  {at}  {:<5} {}", entry.id, entry.channel, entry.to);
    }
    Ok(())
}

pub async fn handle_ingest(config: &CourierConfig, args: IngestArgs) -> anyhow::Result<()> {
    let raw = match &args.path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        },
    };
    let payload: serde_json::Value = serde_json::from_str(&raw).context("payload is not JSON")?;

    let service = open(config).await?;
    match service.ingest(args.channel, &payload).await? {
        Some(outcome) => print_json(&outcome),
        None => bail!("{} adapter did not recognize the payload", args.channel),
    }
}
