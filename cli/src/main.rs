//! tagledger CLI — read the RFID tag registry from the terminal.
//!
//! Usage:
//! ```bash
//! # Reconcile every asset registered since deployment
//! tagledger scan --rpc https://polygon-amoy.g.alchemy.com/v2/KEY --contract 0x...
//!
//! # One token: registration, owner and timeline
//! tagledger lookup --config registry.json --token 0x...
//!
//! # Derive a TokenId from raw tag memory
//! tagledger token-id --epc 0xe280... --tid 0xe200...
//! ```

use std::env;
use std::fmt::Display;
use std::process;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tagledger_core::config::{alchemy_url, redact_url};
use tagledger_core::{BlockBound, EndpointConfig, RegistryConfig, TokenId};
use tagledger_evm::{EventKind, RegistryClient, SubscriptionFilter};

mod tracing_setup;

use tracing_setup::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }
    let rest = &args[2..];

    let result = match args[1].as_str() {
        "scan" => cmd_scan(rest).await,
        "lookup" => cmd_lookup(rest).await,
        "history" => cmd_history(rest).await,
        "tokens" => cmd_tokens(rest).await,
        "watch" => cmd_watch(rest).await,
        "token-id" => cmd_token_id(rest),
        "version" | "--version" | "-V" => {
            println!("tagledger {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("tagledger {}", env!("CARGO_PKG_VERSION"));
    println!("Scan the RFID tag registry and reconcile asset timelines\n");
    println!("USAGE:");
    println!("    tagledger <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    scan       Reconcile every registered asset in a block range");
    println!("    lookup     Registration, owner and timeline of one token");
    println!("    history    Every event mentioning one token, in chain order");
    println!("    tokens     List registrations in a block range");
    println!("    watch      Stream new registry events as JSON lines");
    println!("    token-id   Derive a TokenId from EPC and TID memory");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CONNECTION FLAGS:");
    println!("    --config <PATH>        JSON registry configuration");
    println!("    --rpc <URL>            Primary RPC endpoint");
    println!("    --alchemy-key <KEY>    Use the Alchemy endpoint for --chain-id");
    println!("    --fallback <URL>       Fallback endpoint (default: public Amoy RPC)");
    println!("    --no-fallback          Never fall back");
    println!("    --chain-id <ID>        Expected chain id (default: 80002)");
    println!("    --contract <ADDR>      Registry contract address\n");
    println!("SCAN FLAGS:");
    println!("    --from <N|latest>      First block (default: deployment block)");
    println!("    --to <N|latest>        Last block (default: latest)");
    println!("    --window <N>           Blocks per log query (default: 500)");
    println!("    --concurrency <N>      Assets reconciled in parallel (default: 1)");
    println!("    --strict               Fail on any skipped window or unreadable state");
    println!("    --token <TOKEN_ID>     0x-prefixed 32-byte TokenId (lookup, history, watch)");
    println!("    --kinds <LIST>         watch only: registered,logged");
    println!("    --poll-ms <MS>         watch only: poll interval\n");
    println!("LOGGING FLAGS:");
    println!("    --log-level <LEVEL>    trace|debug|info|warn|error (default: warn)");
    println!("    --log-component <C=L>  Level for one crate, e.g. tagledger-evm=debug (repeatable)");
    println!("    --json-logs            Structured JSON logs on stderr");
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_scan(args: &[String]) -> Result<()> {
    let client = connect(args).await?;
    let (from, to) = block_range(args, &client)?;

    eprintln!("Contract:  {}", client.config().contract_address);
    match client.reader().contract_owner().await {
        Ok(owner) => eprintln!("Owner:     {owner}"),
        Err(e) => eprintln!("Owner:     unavailable ({e})"),
    }
    eprintln!("Endpoint:  {} (chain {})", client.handle().url(), client.handle().chain_id());
    eprintln!("Range:     {from} → {to}\n");

    let scan = client.scan(from, to).await;
    print_json(&scan)?;

    let orphaned: usize = scan.timelines.iter().map(|t| t.orphaned_count()).sum();
    eprintln!(
        "\n{} registrations, {} logged events, {} timelines ({} orphaned entries), {} skipped windows",
        scan.registrations.len(),
        scan.logged_events.len(),
        scan.timelines.len(),
        orphaned,
        scan.skipped_windows.len()
    );
    finish(scan.error.as_deref())
}

async fn cmd_lookup(args: &[String]) -> Result<()> {
    let token = required(args, "--token")?;
    let client = connect(args).await?;
    let (from, to) = block_range(args, &client)?;
    let info = client.lookup(&token, from, to).await;
    print_json(&info)?;
    finish(info.error.as_deref())
}

async fn cmd_history(args: &[String]) -> Result<()> {
    let token = required(args, "--token")?;
    let client = connect(args).await?;
    let (from, to) = block_range(args, &client)?;
    let history = client.token_history(&token, from, to).await;
    print_json(&history)?;
    finish(history.error.as_deref())
}

async fn cmd_tokens(args: &[String]) -> Result<()> {
    let client = connect(args).await?;
    let (from, to) = block_range(args, &client)?;
    let tokens = client.registered_tokens(from, to).await;
    print_json(&tokens)?;
    finish(tokens.error.as_deref())
}

async fn cmd_watch(args: &[String]) -> Result<()> {
    let filter = SubscriptionFilter {
        kinds: parse_kinds(parse_flag(args, "--kinds").as_deref())?,
        token_id: parse_flag(args, "--token")
            .map(|t| t.parse::<TokenId>())
            .transpose()
            .context("invalid --token")?,
        from_block: parse_num(args, "--from")?,
    };
    let client = connect(args).await?;
    let mut sub = client.subscribe(filter)?;
    eprintln!(
        "Watching {} via {} (Ctrl-C to stop)",
        client.config().contract_address,
        client.handle().url()
    );

    loop {
        tokio::select! {
            ev = sub.recv() => match ev {
                Some(ev) => println!("{}", serde_json::to_string(&ev)?),
                None => bail!("subscription stopped"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    sub.cancel().await;
    Ok(())
}

fn cmd_token_id(args: &[String]) -> Result<()> {
    let epc = decode_hex_flag(args, "--epc")?;
    let tid = decode_hex_flag(args, "--tid")?;
    println!("{}", TokenId::from_tag(&epc, &tid));
    Ok(())
}

// ─── Setup ───────────────────────────────────────────────────────────────────

async fn connect(args: &[String]) -> Result<RegistryClient> {
    init_tracing(&log_config(args)?);
    let config = build_config(args)?;
    tracing::debug!(
        primary = %redact_url(&config.endpoints.primary_url),
        contract = %config.contract_address,
        window = config.window_size,
        strict = config.strict,
        "configuration loaded"
    );
    RegistryClient::connect(config)
        .await
        .context("could not connect to an RPC endpoint")
}

fn log_config(args: &[String]) -> Result<LogConfig> {
    let mut config = LogConfig::default();
    if let Some(level) = parse_flag(args, "--log-level") {
        config.level = level;
    }
    for entry in parse_flag_all(args, "--log-component") {
        let (component, level) = entry
            .split_once('=')
            .filter(|(c, l)| !c.is_empty() && !l.is_empty())
            .ok_or_else(|| anyhow!("--log-component expects crate=level, got '{entry}'"))?;
        config.components.insert(component.to_string(), level.to_string());
    }
    config.json = has_flag(args, "--json-logs");
    Ok(config)
}

/// Config file (if any) overlaid with command-line flags.
fn build_config(args: &[String]) -> Result<RegistryConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => RegistryConfig::from_file(&path)
            .with_context(|| format!("load config '{path}'"))?,
        None => {
            let contract = required(args, "--contract")?;
            RegistryConfig::new(EndpointConfig::new(String::new()), contract)
        }
    };

    if let Some(id) = parse_num(args, "--chain-id")? {
        config.endpoints.chain_id = id;
    }
    if let Some(key) = parse_flag(args, "--alchemy-key") {
        let chain_id = config.endpoints.chain_id;
        config.endpoints.primary_url = alchemy_url(&key, chain_id)
            .ok_or_else(|| anyhow!("no Alchemy network for chain id {chain_id}"))?;
    }
    if let Some(url) = parse_flag(args, "--rpc") {
        config.endpoints.primary_url = url;
    }
    if config.endpoints.primary_url.is_empty() {
        bail!("one of --rpc, --alchemy-key or --config is required");
    }
    if let Some(url) = parse_flag(args, "--fallback") {
        config.endpoints.fallback_url = Some(url);
    }
    if has_flag(args, "--no-fallback") {
        config.endpoints.fallback_url = None;
    }
    if let Some(contract) = parse_flag(args, "--contract") {
        config.contract_address = contract;
    }
    if let Some(window) = parse_num(args, "--window")? {
        config.window_size = window;
    }
    if let Some(n) = parse_num(args, "--concurrency")? {
        config.reconcile_concurrency = n;
    }
    if let Some(ms) = parse_num(args, "--poll-ms")? {
        config.subscription.poll_interval_ms = ms;
    }
    if has_flag(args, "--strict") {
        config.strict = true;
    }

    config.validate()?;
    Ok(config)
}

fn block_range(args: &[String], client: &RegistryClient) -> Result<(BlockBound, BlockBound)> {
    let from = match parse_flag(args, "--from") {
        Some(s) => s.parse::<BlockBound>().context("invalid --from")?,
        None => client.deployment_block(),
    };
    let to = match parse_flag(args, "--to") {
        Some(s) => s.parse::<BlockBound>().context("invalid --to")?,
        None => BlockBound::Latest,
    };
    Ok((from, to))
}

fn parse_kinds(list: Option<&str>) -> Result<Vec<EventKind>> {
    let Some(list) = list else {
        return Ok(vec![]);
    };
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s {
            "registered" | "NFTRegistered" => Ok(EventKind::AssetRegistered),
            "logged" | "EventLogged" => Ok(EventKind::EventLogged),
            other => Err(anyhow!("unknown event kind '{other}' (expected registered or logged)")),
        })
        .collect()
}

// ─── Flag helpers ────────────────────────────────────────────────────────────

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Every value given for a repeatable flag.
fn parse_flag_all(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn required(args: &[String], flag: &str) -> Result<String> {
    parse_flag(args, flag).ok_or_else(|| anyhow!("{flag} is required"))
}

fn parse_num<T>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    parse_flag(args, flag)
        .map(|s| s.parse::<T>().map_err(|e| anyhow!("invalid {flag} '{s}': {e}")))
        .transpose()
}

fn decode_hex_flag(args: &[String], flag: &str) -> Result<Vec<u8>> {
    let value = required(args, flag)?;
    hex::decode(value.strip_prefix("0x").unwrap_or(&value))
        .with_context(|| format!("{flag} is not valid hex"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish(error: Option<&str>) -> Result<()> {
    match error {
        Some(e) => bail!("{e}"),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    #[test]
    fn flags_override_defaults() {
        let a = args(&format!(
            "--rpc http://localhost:8545 --contract {CONTRACT} --window 100 --strict --no-fallback"
        ));
        let config = build_config(&a).unwrap();
        assert_eq!(config.endpoints.primary_url, "http://localhost:8545");
        assert_eq!(config.endpoints.fallback_url, None);
        assert_eq!(config.window_size, 100);
        assert!(config.strict);
        assert_eq!(config.reconcile_concurrency, 1);
    }

    #[test]
    fn alchemy_key_builds_primary_url() {
        let a = args(&format!("--alchemy-key abc --contract {CONTRACT}"));
        let config = build_config(&a).unwrap();
        assert!(config.endpoints.primary_url.contains("polygon-amoy"));
        assert!(config.endpoints.primary_url.ends_with("/abc"));
    }

    #[test]
    fn alchemy_key_rejects_unknown_chain() {
        let a = args(&format!("--chain-id 999 --alchemy-key k --contract {CONTRACT}"));
        let err = build_config(&a).unwrap_err().to_string();
        assert!(err.contains("chain id 999"), "{err}");
    }

    #[test]
    fn log_components_are_collected() {
        let a = args(
            "--log-level info --log-component tagledger-evm=debug --log-component tagledger-rpc=trace --json-logs",
        );
        let config = log_config(&a).unwrap();
        assert!(config.json);
        assert_eq!(
            config.directives(),
            "info,tagledger_evm=debug,tagledger_rpc=trace"
        );
        assert!(log_config(&args("--log-component tagledger-evm")).is_err());
        assert!(log_config(&args("--log-component =debug")).is_err());
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let a = args(&format!("--contract {CONTRACT}"));
        assert!(build_config(&a).is_err());
        assert!(build_config(&args("--rpc http://localhost:8545")).is_err());
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let a = args(&format!("--rpc http://x --contract {CONTRACT} --window many"));
        let err = build_config(&a).unwrap_err().to_string();
        assert!(err.contains("--window"), "{err}");
    }

    #[test]
    fn kinds_list_parses() {
        assert!(parse_kinds(None).unwrap().is_empty());
        assert_eq!(
            parse_kinds(Some("logged")).unwrap(),
            vec![EventKind::EventLogged]
        );
        assert_eq!(parse_kinds(Some("registered,logged")).unwrap().len(), 2);
        assert!(parse_kinds(Some("minted")).is_err());
    }

    #[test]
    fn hex_flags_accept_optional_prefix() {
        let a = args("--epc 0xe280 --tid e200");
        assert_eq!(decode_hex_flag(&a, "--epc").unwrap(), vec![0xe2, 0x80]);
        assert_eq!(decode_hex_flag(&a, "--tid").unwrap(), vec![0xe2, 0x00]);
        assert!(decode_hex_flag(&a, "--missing").is_err());
    }
}
