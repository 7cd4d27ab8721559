//! EdDSA TSS Party CLI
//!
//! Command-line interface for running threshold wallet party operations:
//! - Party identity generation
//! - Distributed Key Generation (DKG) over the relay
//! - Threshold signing over the relay
//! - Signature verification and share inspection
//! - A single-process simulation of a whole wallet

mod roster;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use eddsa_tss_core::{
    finalize_signature, run_dkg, run_sign, to_additive_share, wallet_address, AccessStructure,
    CurveId, FileKeyStore, KeyShare, KeyStore, MemoryKeyStore, MemoryNetwork, Orchestrator,
    ProtocolConfig, PublicKey, Quorum, Session, Signature, SpentShares,
};
use msg_relay_client::{Identity, RelayTransport};
use roster::{load_policy, parse_names, parse_session_id, Roster};
use std::path::PathBuf;
use tracing::{info, Level};

/// EdDSA TSS Party - threshold wallet party node
#[derive(Parser)]
#[command(name = "tss-party")]
#[command(about = "Threshold EdDSA MPC party node")]
#[command(version)]
struct Cli {
    /// Relay service URL
    #[arg(short, long, env = "RELAY_URL", default_value = "http://127.0.0.1:8080")]
    relay: String,

    /// Data directory for identity, policies and key shares
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    /// Protocol configuration file (JSON)
    #[arg(short, long, env = "TSS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate this party's relay identity
    Identity {
        /// Replace an existing identity
        #[arg(long)]
        force: bool,
    },

    /// Run distributed key generation
    Keygen {
        /// This party's name on the roster
        #[arg(short, long, env = "PARTY_NAME")]
        name: String,

        /// Wallet identifier
        #[arg(short, long)]
        wallet: String,

        /// Roster file listing every party and its public identity
        #[arg(long)]
        roster: PathBuf,

        /// Access policy file (JSON)
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Flat k-of-n policy over the roster instead of a policy file
        #[arg(short, long)]
        threshold: Option<usize>,

        /// Session id shared by all parties (hex, 32 bytes)
        #[arg(short, long)]
        session: String,

        /// Seal the stored share under a key derived from this PIN
        #[arg(long, env = "TSS_PIN", hide_env_values = true)]
        pin: Option<String>,
    },

    /// Sign a message with an authorized quorum
    Sign {
        /// This party's name on the roster
        #[arg(short, long, env = "PARTY_NAME")]
        name: String,

        /// Wallet identifier
        #[arg(short, long)]
        wallet: String,

        /// Roster file listing every party and its public identity
        #[arg(long)]
        roster: PathBuf,

        /// Signing parties (comma-separated names)
        #[arg(short, long)]
        quorum: String,

        /// Party that assembles the signature
        #[arg(long)]
        receiver: String,

        /// Session id shared by the quorum (hex, 32 bytes)
        #[arg(short, long)]
        session: String,

        /// Message to sign
        #[arg(short, long)]
        message: String,

        /// Treat the message as hex
        #[arg(long)]
        hex: bool,

        /// PIN the share was sealed with
        #[arg(long, env = "TSS_PIN", hide_env_values = true)]
        pin: Option<String>,
    },

    /// Verify an Ed25519 signature
    Verify {
        /// Public key (hex) or wallet address (base58)
        #[arg(short, long)]
        public_key: String,

        /// Signed message
        #[arg(short, long)]
        message: String,

        /// Treat the message as hex
        #[arg(long)]
        hex: bool,

        /// Signature (hex, 64 bytes)
        #[arg(short, long)]
        signature: String,
    },

    /// Show key share info
    Info {
        /// Party name
        #[arg(short, long, env = "PARTY_NAME")]
        name: String,

        /// Wallet identifier
        #[arg(short, long)]
        wallet: String,

        /// PIN the share was sealed with
        #[arg(long, env = "TSS_PIN", hide_env_values = true)]
        pin: Option<String>,
    },

    /// Run key generation and signing for every party in this process
    Simulate {
        /// Party names (comma-separated)
        #[arg(long, default_value = "server,kms,pin")]
        parties: String,

        /// Threshold (k-of-n)
        #[arg(short, long, default_value = "2")]
        threshold: usize,

        /// Signing parties (comma-separated names)
        #[arg(short, long, default_value = "server,pin")]
        quorum: String,

        /// Message to sign
        #[arg(short, long, default_value = "test")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ProtocolConfig::from_file(path)?,
        None => ProtocolConfig::default(),
    };
    config.validate()?;

    match &cli.command {
        Commands::Identity { force } => create_identity(&cli, *force)?,
        Commands::Keygen {
            name,
            wallet,
            roster,
            policy,
            threshold,
            session,
            pin,
        } => {
            let roster = Roster::load(roster)?;
            let access = load_policy(policy.as_deref(), *threshold, &roster)?;
            let session_id = parse_session_id(session)?;
            run_keygen(&cli, &config, name, wallet, &roster, &access, session_id, pin.as_deref())
                .await?;
        }
        Commands::Sign {
            name,
            wallet,
            roster,
            quorum,
            receiver,
            session,
            message,
            hex,
            pin,
        } => {
            let roster = Roster::load(roster)?;
            let session_id = parse_session_id(session)?;
            let message = message_bytes(message, *hex)?;
            let request = SignRequest {
                name,
                wallet,
                quorum: parse_names(quorum),
                receiver,
                session_id,
                message: &message,
            };
            run_signing(&cli, &config, &roster, request, pin.as_deref()).await?;
        }
        Commands::Verify {
            public_key,
            message,
            hex,
            signature,
        } => {
            let public_key = parse_public_key(public_key)?;
            let message = message_bytes(message, *hex)?;
            Signature::from_slice(&hex::decode(signature)?)?.verify(&public_key, &message)?;
            println!("Signature is valid");
        }
        Commands::Info { name, wallet, pin } => {
            show_info(&cli, &config, name, wallet, pin.as_deref()).await?;
        }
        Commands::Simulate {
            parties,
            threshold,
            quorum,
            message,
        } => {
            simulate(&config, &parse_names(parties), *threshold, &parse_names(quorum), message)
                .await?;
        }
    }

    Ok(())
}

fn create_identity(cli: &Cli, force: bool) -> Result<()> {
    let path = identity_path(cli);
    if path.exists() && !force {
        bail!(
            "identity {} already exists, pass --force to replace it",
            path.display()
        );
    }

    std::fs::create_dir_all(&cli.dest)?;
    let identity = Identity::generate();
    std::fs::write(&path, identity.to_json()?.as_bytes())?;

    info!(path = ?path, "Identity generated");

    // Print the public half for the roster
    println!("{}", serde_json::to_string_pretty(&identity.public())?);

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_keygen(
    cli: &Cli,
    config: &ProtocolConfig,
    name: &str,
    wallet: &str,
    roster: &Roster,
    access: &AccessStructure,
    session_id: [u8; 32],
    pin: Option<&str>,
) -> Result<()> {
    let names = roster.names();
    let index = roster.position(name)?;
    let peers = roster.identities(&names)?;

    info!(
        party = name,
        index,
        n_parties = names.len(),
        wallet,
        "Starting DKG"
    );

    let transport = RelayTransport::new(&cli.relay, session_id, index, load_identity(cli)?, peers)?;
    let mut session =
        Session::open(transport, names.len(), index, names)?.with_timeout(config.receive_timeout());
    let output = run_dkg(&mut session, access).await;
    session.close().await?;
    let output = output?;

    // Save policy and key share
    let policy_path = policy_path(cli, wallet)?;
    std::fs::create_dir_all(cli.dest.join("policies"))?;
    std::fs::write(&policy_path, serde_json::to_string_pretty(access)?)?;

    let store = key_store(cli, config, pin)?;
    store
        .store(wallet, name, &output.key_share.to_bytes()?)
        .await?;

    info!(
        public_key = hex::encode(output.public_key),
        sealed = pin.is_some(),
        "DKG completed, key share saved"
    );

    println!("Public Key: {}", hex::encode(output.public_key));
    println!("Address: {}", wallet_address(&output.public_key));

    Ok(())
}

struct SignRequest<'a> {
    name: &'a str,
    wallet: &'a str,
    quorum: Vec<String>,
    receiver: &'a str,
    session_id: [u8; 32],
    message: &'a [u8],
}

async fn run_signing(
    cli: &Cli,
    config: &ProtocolConfig,
    roster: &Roster,
    request: SignRequest<'_>,
    pin: Option<&str>,
) -> Result<()> {
    let access = load_stored_policy(cli, request.wallet)?;
    let key_share = load_key_share(cli, config, request.wallet, request.name, pin).await?;

    // Every member builds the same canonical quorum from the same names
    let quorum = Quorum::new(&access, &request.quorum)?;
    let index = quorum
        .position(request.name)
        .ok_or_else(|| anyhow!("party '{}' is not in the quorum", request.name))?;
    let receiver = quorum
        .position(request.receiver)
        .ok_or_else(|| anyhow!("receiver '{}' is not in the quorum", request.receiver))?;

    info!(
        party = request.name,
        quorum = ?quorum.names(),
        receiver = request.receiver,
        "Starting signing"
    );

    let additive = to_additive_share(&key_share, &access, &quorum)?;
    let public_key = key_share.public_key;
    drop(key_share);

    let peers = roster.identities(quorum.names())?;
    let transport =
        RelayTransport::new(&cli.relay, request.session_id, index, load_identity(cli)?, peers)?;
    let mut session = Session::open(transport, quorum.len(), index, quorum.names().to_vec())?
        .with_timeout(config.receive_timeout());
    let spent = SpentShares::new();
    let output = run_sign(&mut session, additive, request.message, receiver, &spent).await;
    session.close().await?;

    match output? {
        Some(bytes) => {
            let signature =
                finalize_signature(&bytes, access.curve(), &public_key, request.message)?;
            info!(signature = %signature, "Signature generated");
            println!("Signature: {}", signature);
        }
        None => {
            info!(receiver = request.receiver, "Partial signature delivered");
        }
    }

    Ok(())
}

async fn show_info(
    cli: &Cli,
    config: &ProtocolConfig,
    name: &str,
    wallet: &str,
    pin: Option<&str>,
) -> Result<()> {
    let key_share = load_key_share(cli, config, wallet, name, pin).await?;

    println!("Key Share Info:");
    println!("  Party: {} (index {})", key_share.party_name, key_share.party_index);
    println!("  Curve: {}", key_share.curve);
    println!("  Roster: {}", key_share.roster.join(", "));
    println!("  Policy: {}", hex::encode(key_share.policy_fingerprint));
    println!("  Public Key: {}", hex::encode(key_share.public_key));
    println!("  Address: {}", wallet_address(&key_share.public_key));

    Ok(())
}

async fn simulate(
    config: &ProtocolConfig,
    parties: &[String],
    threshold: usize,
    quorum: &[String],
    message: &str,
) -> Result<()> {
    let access = AccessStructure::threshold_of(parties, threshold, CurveId::Ed25519)?;
    let orchestrator = Orchestrator::new(MemoryKeyStore::new(), config.clone());

    let key = orchestrator
        .generate("simulation", &access, parties, MemoryNetwork::endpoints(parties.len()))
        .await?;
    println!("Public Key: {}", hex::encode(key.public_key));
    println!("Address: {}", key.address);

    let quorum = Quorum::new(&access, quorum)?;
    let signature = orchestrator
        .sign(
            "simulation",
            &access,
            &quorum,
            message.as_bytes(),
            0,
            MemoryNetwork::endpoints(quorum.len()),
        )
        .await?;
    signature.verify(&key.public_key, message.as_bytes())?;

    println!("Quorum: {}", quorum.names().join(", "));
    println!("Signature: {}", signature);

    Ok(())
}

fn identity_path(cli: &Cli) -> PathBuf {
    cli.dest.join("identity.json")
}

fn load_identity(cli: &Cli) -> Result<Identity> {
    let path = identity_path(cli);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading identity {}, run `identity` first", path.display()))?;
    Ok(Identity::from_json(&json)?)
}

fn policy_path(cli: &Cli, wallet: &str) -> Result<PathBuf> {
    if wallet.is_empty() || wallet.contains(['/', '\\']) || wallet.starts_with('.') {
        bail!("invalid wallet id '{}'", wallet);
    }
    Ok(cli.dest.join("policies").join(format!("{}.json", wallet)))
}

fn load_stored_policy(cli: &Cli, wallet: &str) -> Result<AccessStructure> {
    let path = policy_path(cli, wallet)?;
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading policy {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

fn key_store(cli: &Cli, config: &ProtocolConfig, pin: Option<&str>) -> Result<FileKeyStore> {
    let store = FileKeyStore::new(cli.dest.join("shares"));
    Ok(match pin {
        Some(pin) => store.with_sealing_key(config.kdf.derive(pin)?),
        None => store,
    })
}

async fn load_key_share(
    cli: &Cli,
    config: &ProtocolConfig,
    wallet: &str,
    name: &str,
    pin: Option<&str>,
) -> Result<KeyShare> {
    let store = key_store(cli, config, pin)?;
    let blob = store.load(wallet, name).await?;
    Ok(KeyShare::from_bytes(&blob)?)
}

fn message_bytes(message: &str, is_hex: bool) -> Result<Vec<u8>> {
    if is_hex {
        Ok(hex::decode(message)?)
    } else {
        Ok(message.as_bytes().to_vec())
    }
}

/// Accept either hex or a base58 wallet address
fn parse_public_key(encoded: &str) -> Result<PublicKey> {
    let bytes = match hex::decode(encoded) {
        Ok(bytes) => bytes,
        Err(_) => bs58::decode(encoded).into_vec()?,
    };
    bytes
        .try_into()
        .map_err(|_| anyhow!("public key must be 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_forms() {
        let key = [9u8; 32];
        assert_eq!(parse_public_key(&hex::encode(key)).unwrap(), key);
        assert_eq!(parse_public_key(&wallet_address(&key)).unwrap(), key);
        assert!(parse_public_key("abcd").is_err());
    }

    #[test]
    fn test_message_bytes() {
        assert_eq!(message_bytes("test", false).unwrap(), b"test");
        assert_eq!(message_bytes("7465", true).unwrap(), b"te");
        assert!(message_bytes("xyz", true).is_err());
    }

    #[tokio::test]
    async fn test_simulate() {
        let parties = parse_names("server,kms,pin");
        simulate(
            &ProtocolConfig::default(),
            &parties,
            2,
            &parse_names("kms,pin"),
            "test",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_pin_sealed_share_needs_the_pin() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "tss-party",
            "--dest",
            dir.path().to_str().unwrap(),
            "simulate",
        ]);
        let config = ProtocolConfig {
            kdf: eddsa_tss_core::PinKdf {
                iterations: 10,
                ..Default::default()
            },
            ..ProtocolConfig::default()
        };

        let names = parse_names("server,pin");
        let access = AccessStructure::threshold_of(&names, 2, CurveId::Ed25519).unwrap();
        let orchestrator = Orchestrator::new(MemoryKeyStore::new(), config.clone());
        orchestrator
            .generate("w", &access, &names, MemoryNetwork::endpoints(2))
            .await
            .unwrap();
        let blob = orchestrator.store().load("w", "pin").await.unwrap();

        let sealed = key_store(&cli, &config, Some("1234")).unwrap();
        sealed.store("w", "pin", &blob).await.unwrap();

        let share = load_key_share(&cli, &config, "w", "pin", Some("1234")).await.unwrap();
        assert_eq!(share.party_name, "pin");
        assert!(load_key_share(&cli, &config, "w", "pin", Some("4321")).await.is_err());
        assert!(load_key_share(&cli, &config, "w", "pin", None).await.is_err());
    }

    #[test]
    fn test_wallet_id_cannot_escape_dest() {
        let cli = Cli::parse_from(["tss-party", "simulate"]);
        assert!(policy_path(&cli, "../x").is_err());
        assert!(policy_path(&cli, "a/b").is_err());
        assert!(policy_path(&cli, "main").is_ok());
    }
}
