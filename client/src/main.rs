use clap::{Parser, ValueEnum};
use client::network::{Client, ClientConfig};
use log::info;
use shared::{CheckoutRule, MatchFormat, StartRule};
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Rule {
    Simple,
    Double,
    Master,
}

impl From<Rule> for CheckoutRule {
    fn from(rule: Rule) -> Self {
        match rule {
            Rule::Simple => CheckoutRule::Simple,
            Rule::Double => CheckoutRule::Double,
            Rule::Master => CheckoutRule::Master,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Your participant id
    #[arg(short = 'p', long)]
    participant: u32,

    /// Join an existing match
    #[arg(short = 'm', long)]
    match_id: Option<u64>,

    /// Create a match for these participants (comma separated, host first)
    #[arg(long, value_delimiter = ',', conflicts_with = "match_id")]
    create: Vec<u32>,

    /// Token passed to the server on join
    #[arg(long, default_value = "")]
    token: String,

    /// Starting score when creating a match
    #[arg(long, default_value = "501")]
    score: u32,

    /// Legs needed to win a set (or the match)
    #[arg(long, default_value = "3")]
    legs: u32,

    /// Sets needed to win the match; 1 plays legs only
    #[arg(long, default_value = "1")]
    sets: u32,

    #[arg(long, value_enum, default_value = "simple")]
    check_in: Rule,

    #[arg(long, value_enum, default_value = "double")]
    check_out: Rule,

    /// Pick the first thrower of each leg at random instead of alternating
    #[arg(long)]
    random_start: bool,

    /// Seconds before an unacknowledged submission is resent
    #[arg(long, default_value = "2")]
    ack_timeout: u64,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        let create = if self.create.is_empty() {
            None
        } else {
            let format = MatchFormat {
                starting_score: self.score,
                legs_to_win: self.legs,
                sets_to_win: self.sets,
                in_rule: self.check_in.into(),
                out_rule: self.check_out.into(),
                start_rule: if self.random_start {
                    StartRule::Random { seed: 0 }
                } else {
                    StartRule::Alternate
                },
            };
            Some((format, self.create))
        };

        ClientConfig {
            server_addr: self.server,
            participant: self.participant,
            match_id: self.match_id,
            create,
            auth_token: self.token,
            ack_timeout: Duration::from_secs(self.ack_timeout),
            ..ClientConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.into_config();

    info!("Starting client...");
    info!("Connecting to: {}", config.server_addr);
    println!("{}", client::input::HELP);

    let mut client = Client::new(config).await?;
    client.run().await?;

    Ok(())
}
