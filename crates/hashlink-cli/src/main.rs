use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hashlink_core::{Amount, Wallet};
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hashlink-cli")]
#[command(about = "CLI client for the hashlink node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign a transfer locally and submit it
    Submit {
        /// Sender's hex-encoded 32-byte secret key
        #[arg(long, env = "HASHLINK_SECRET")]
        secret: String,
        /// Recipient identity
        #[arg(long)]
        to: String,
        /// Amount
        #[arg(long)]
        amount: Amount,
    },
    /// Ask the node to mine the pending pool
    Mine,
    /// Show a balance; the node's hosting identity when none is given
    Balance {
        identity: Option<String>,
    },
    /// Dump the chain
    Chain,
    /// Dump the pending pool
    Pending,
    /// Check chain integrity on the node
    Verify,
    /// Print the identity belonging to a secret key
    Identity {
        #[arg(long, env = "HASHLINK_SECRET")]
        secret: String,
    },
}

#[derive(Serialize)]
struct Tx<'a> {
    sender: &'a str,
    recipient: &'a str,
    signature: &'a str,
    amount: Amount,
}

async fn print_response(res: Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    println!("status: {status}");
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = Client::new();

    let res = match cli.cmd {
        Command::Identity { secret } => {
            let wallet = Wallet::from_secret_hex(&secret).context("invalid secret key")?;
            println!("{}", wallet.identity());
            return Ok(());
        }
        Command::Submit { secret, to, amount } => {
            let wallet = Wallet::from_secret_hex(&secret).context("invalid secret key")?;
            let signature = wallet.sign(&to, amount);
            let tx = Tx {
                sender: wallet.identity(),
                recipient: &to,
                signature: &signature,
                amount,
            };
            debug!(sender = tx.sender, recipient = tx.recipient, amount, "submitting transfer");
            client.post(format!("{node}/transaction")).json(&tx).send().await?
        }
        Command::Mine => client.post(format!("{node}/mine")).send().await?,
        Command::Balance { identity } => {
            let url = match identity {
                Some(identity) => format!("{node}/balance/{identity}"),
                None => format!("{node}/balance"),
            };
            client.get(url).send().await?
        }
        Command::Chain => client.get(format!("{node}/chain")).send().await?,
        Command::Pending => client.get(format!("{node}/transactions")).send().await?,
        Command::Verify => client.get(format!("{node}/chain/verify")).send().await?,
    };
    print_response(res).await
}
