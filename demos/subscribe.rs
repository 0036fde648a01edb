// ABOUTME: Minimal CLI demonstrating monitor creation and a long-running push session
// ABOUTME: Not part of the library's public contract; exists to exercise the API end-to-end

use std::error::Error;
use std::time::Duration;

use argh::FromArgs;
use push_client::client::PushClient;
use push_client::config::{CaCerts, PushConfig};
use push_client::monitor::MonitorDescriptor;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Subscribe to a topic and print delivered events until interrupted.
#[derive(FromArgs)]
struct CliArgs {
    /// whether to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// username for the push service
    #[argh(option)]
    username: String,

    /// password for the push service
    #[argh(option)]
    password: String,

    /// hostname of the push service (default: login.etherios.com)
    #[argh(option)]
    host: Option<String>,

    /// disable TLS verification (nonprod only)
    #[argh(switch)]
    insecure: bool,

    /// comma-separated topic list (e.g. DeviceCore[U],FileDataCore)
    #[argh(option)]
    topics: String,

    /// how long to run before exiting, in seconds (default: 300)
    #[argh(option)]
    run_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut builder = PushConfig::builder(cli_args.username, cli_args.password)
        .hostname(cli_args.host.unwrap_or_else(|| "login.etherios.com".to_string()));
    if cli_args.insecure {
        builder = builder.secure(false).ca_certs(CaCerts::Insecure);
    }
    let client = PushClient::new(builder.build());

    let topics: Vec<String> = cli_args.topics.split(',').map(str::to_string).collect();
    let monitor_id = match client.get_monitor(&topics).await? {
        Some(id) => id,
        None => client.create_monitor(&MonitorDescriptor::new(topics.clone())).await?,
    };
    info!(monitor_id, "using monitor");

    client
        .create_session(monitor_id, |payload| {
            println!("{}", String::from_utf8_lossy(payload));
            true
        })
        .await?;

    tokio::time::sleep(Duration::from_secs(cli_args.run_duration.unwrap_or(300))).await;

    client.stop_all().await;
    Ok(())
}
