#![forbid(unsafe_code)]
//! Command-line entry point for a wotchain node.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use wotchain::config::{load_config, DEFAULT_CONFIG_FILE};
use wotchain::crypto::{hash_to_string, Address, KeyPair, Signer};
use wotchain::node::Node;
use wotchain::transaction::{BlockTransaction, Tx, TxOutput};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the node until Ctrl-C
    Run,
    /// Mines a single block from pending transactions and commits it
    MineBlock {
        /// Address credited with the block reward
        #[arg(long)]
        reward: Address,
    },
    /// Prints the current chain head
    Head,
    /// Prints the balance and nonce of an address
    Balance { address: Address },
    /// Prints the publisher an address currently signs for
    Publisher { address: Address },
    /// Signs a transfer, optionally carrying a JSON document, and queues it for mining
    Send {
        /// Hex-encoded secret key of the sender
        #[arg(long)]
        secret: String,
        #[arg(long)]
        to: Address,
        /// Amount in the smallest coin unit
        #[arg(long)]
        amount: u64,
        #[arg(long, default_value_t = 0)]
        fee: u64,
        /// JSON object of string values published with the transaction
        #[arg(long)]
        data: Option<String>,
        /// Replay nonce; defaults to the next unused one
        #[arg(long)]
        nonce: Option<u64>,
        /// Print the signed envelope without queueing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Queues a signed transaction envelope given as JSON
    Submit { envelope: String },
    /// Generates a new key pair for local testing
    Keygen,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Commands::Keygen = cli.command {
        let keypair = KeyPair::generate();
        println!("address: {}", keypair.address());
        println!("secret:  {}", keypair.secret_hex());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let node = Arc::new(Node::init(config)?);

    match cli.command {
        Commands::Run => node.run().await?,
        Commands::MineBlock { reward } => {
            let engine = node.engine.clone();
            let start = Instant::now();
            let delta = tokio::task::spawn_blocking(move || {
                let sealed = engine.mine_from_mempool(reward)?;
                engine.validate_and_commit_block(&sealed)
            })
            .await??;
            println!(
                "Mined block {} in {:.2?} (fees {}, state {})",
                delta.height,
                start.elapsed(),
                delta.total_fees,
                delta.commitment_str()
            );
        }
        Commands::Head => {
            let head = node.engine.chain_head()?;
            println!("height: {}", head.height);
            println!("hash:   {}", hash_to_string(&head.hash));
        }
        Commands::Balance { address } => {
            let state = node.engine.account_state(&address)?;
            println!("balance: {}", state.balance);
            println!("nonce:   {}", state.nonce);
        }
        Commands::Publisher { address } => match node.engine.publisher_for(&address)? {
            Some(publisher) => {
                println!("id:   {}", publisher.publisher_id);
                println!("name: {}", publisher.display_name);
                for key in &publisher.keys {
                    let until = key.until_height.map_or("-".to_string(), |h| h.to_string());
                    println!("key:  {} [{}, {})", key.address, key.since_height, until);
                }
            }
            None => println!("{} is not a current publisher key", address),
        },
        Commands::Send {
            secret,
            to,
            amount,
            fee,
            data,
            nonce,
            dry_run,
        } => {
            let keypair = KeyPair::from_secret_bytes(&hex::decode(secret.trim())?)?;
            let sender = keypair.address();
            let nonce = match nonce {
                Some(nonce) => nonce,
                None => node.engine.next_nonce(&sender)?,
            };
            let document: BTreeMap<String, String> = match data {
                Some(json) => serde_json::from_str(&json)?,
                None => BTreeMap::new(),
            };
            if sender == to {
                tracing::warn!("Sending from and to the same address {}", sender);
            }

            let tx = Tx::transfer(sender, nonce, vec![TxOutput::new(to, amount)], fee).with_published_data(document);
            let envelope = BlockTransaction::signed(&tx, &keypair)?;
            println!("{}", serde_json::to_string(&envelope)?);
            if !dry_run {
                let hash = node.engine.submit_transaction(envelope)?;
                println!("queued {} (nonce {})", hash_to_string(&hash), nonce);
            }
        }
        Commands::Submit { envelope } => {
            let envelope: BlockTransaction = serde_json::from_str(&envelope)?;
            let hash = node.engine.submit_transaction(envelope)?;
            println!("queued {}", hash_to_string(&hash));
        }
        Commands::Keygen => {}
    }

    Ok(())
}
