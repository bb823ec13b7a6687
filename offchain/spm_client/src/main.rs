// offchain/spm_client/src/main.rs
use std::{env, str::FromStr, sync::Arc};

use anyhow::{anyhow, bail, Result};
use dotenvy::dotenv;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spm_client::{
    config::{ChannelConfig, ClientConfig, LEADERBOARD_PAGE_SIZE, MAX_MARKETS_PER_PAGE},
    fetch::{ProgramReader, RpcAccountSource},
    live::LiveChannel,
    protocol::{sol_to_lamports, SpmProgram},
    store::MarketsFeed,
    types::{Market, MarketCategory, Side},
    views::{
        self, calculate_odds, format_bps, format_countdown, format_pnl, format_sol,
        format_time_ago, truncate_address, unix_now, MarketFilter, SortBy,
    },
    wallet::{submit, KeypairWallet, SubmitOptions, WalletSigner},
};

const USAGE: &str = "usage: spm-client <command>
  markets [category] [sort]     list markets (sort: volume|newest|closing|trending)
  market <address>              market detail with bets and arguments
  leaderboard                   top wallets by PnL
  portfolio [wallet]            positions for a wallet (default: local keypair)
  watch                         follow market updates live
  bet <market> <a|b> <sol>      place a bet";

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spm_client=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load variables from .env if present
    dotenv().ok();
    init_logging();

    let cfg = ClientConfig::from_env()?;
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(cmd) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };

    let source = RpcAccountSource::new(cfg.rpc_url.clone(), cfg.commitment);
    let reader = Arc::new(ProgramReader::new(source, cfg.program_id));

    println!("[spm] Program: {}", cfg.program_id);
    println!("[spm] RPC:     {}", cfg.rpc_url);

    match cmd.as_str() {
        "markets" => cmd_markets(&reader, &args[1..]).await,
        "market" => {
            let address = parse_pubkey(args.get(1), "market address")?;
            cmd_market(&reader, &address).await
        }
        "leaderboard" => cmd_leaderboard(&reader).await,
        "portfolio" => {
            let wallet = match args.get(1) {
                Some(raw) => Pubkey::from_str(raw).map_err(|_| anyhow!("invalid wallet {raw}"))?,
                None => local_wallet(&cfg)?
                    .pubkey()
                    .ok_or_else(|| anyhow!("wallet not connected"))?,
            };
            cmd_portfolio(&reader, &wallet).await
        }
        "watch" => cmd_watch(&cfg, reader).await,
        "bet" => cmd_bet(&cfg, &reader, &args[1..]).await,
        other => {
            eprintln!("[spm] Unknown command: {other}");
            println!("{USAGE}");
            Ok(())
        }
    }
}

fn parse_pubkey(raw: Option<&String>, what: &str) -> Result<Pubkey> {
    let raw = raw.ok_or_else(|| anyhow!("missing {what}"))?;
    Pubkey::from_str(raw).map_err(|_| anyhow!("invalid {what}: {raw}"))
}

fn local_wallet(cfg: &ClientConfig) -> Result<KeypairWallet> {
    KeypairWallet::from_file(&cfg.keypair_path)
        .map_err(|e| anyhow!("failed to read keypair {}: {e}", cfg.keypair_path.display()))
}

fn print_market_row(m: &Market, now: i64) {
    let odds = calculate_odds(m);
    println!(
        "{}  {:<13} {:<9} {:>6} {} / {:>6} {}  vol {:>8} SOL  {}  {}",
        truncate_address(&m.address.to_string(), 4),
        m.category.label(),
        m.status.label(),
        format_bps(odds.side_a_bps),
        m.side_a_label,
        format_bps(odds.side_b_bps),
        m.side_b_label,
        format_sol(m.total_volume),
        format_countdown(m.closes_at, now),
        m.title,
    );
}

async fn cmd_markets(reader: &ProgramReader<RpcAccountSource>, args: &[String]) -> Result<()> {
    let mut filter = MarketFilter::default();
    for arg in args {
        if let Some(category) = MarketCategory::parse(arg) {
            filter.category = Some(category);
        } else if let Some(sort) = SortBy::parse(arg) {
            filter.sort_by = sort;
        } else {
            bail!("unknown category or sort: {arg}");
        }
    }

    let markets = reader.fetch_markets().await?;
    let now = unix_now();
    let shown = filter.apply(&markets, now);
    println!("[spm] {} markets ({} match)", markets.len(), shown.len());
    for m in views::paginate(&shown, 0, MAX_MARKETS_PER_PAGE) {
        print_market_row(m, now);
    }
    Ok(())
}

async fn cmd_market(reader: &ProgramReader<RpcAccountSource>, address: &Pubkey) -> Result<()> {
    let (market, bets, arguments) = tokio::try_join!(
        reader.fetch_market(address),
        reader.fetch_market_bets(address),
        reader.fetch_market_arguments(address),
    )?;
    let market = market.ok_or_else(|| anyhow!("market {address} not found"))?;
    let now = unix_now();

    println!("[spm] {}", market.title);
    if !market.description.is_empty() {
        println!("      {}", market.description);
    }
    print_market_row(&market, now);
    if let Some(side) = market.winning_side {
        println!("[spm] Resolved: {} ({})", market.side_label(side), market.resolution_reason);
    }
    if market.bounty > 0 {
        println!("[spm] Bounty: {} SOL", format_sol(market.bounty));
    }

    println!("[spm] {} bets", bets.len());
    for b in &bets {
        println!(
            "  {}  {:<8} {:>10} SOL  {}",
            truncate_address(&b.bettor.to_string(), 4),
            market.side_label(b.side),
            format_sol(b.amount),
            format_time_ago(b.created_at, now),
        );
    }

    println!("[spm] {} arguments", arguments.len());
    for a in &arguments {
        println!(
            "  [{:+}] {} ({}): {}",
            a.score(),
            truncate_address(&a.author.to_string(), 4),
            market.side_label(a.side),
            a.content,
        );
    }
    Ok(())
}

async fn cmd_leaderboard(reader: &ProgramReader<RpcAccountSource>) -> Result<()> {
    let rows = reader.fetch_leaderboard().await?;
    for r in views::paginate(&rows, 0, LEADERBOARD_PAGE_SIZE) {
        println!(
            "{:>3}. {}  pnl {:>10}  bets {:>4}  win {:>5.1}%  vol {} SOL",
            r.rank,
            truncate_address(&r.wallet.to_string(), 4),
            format_pnl(r.total_pnl),
            r.total_bets,
            r.win_rate,
            format_sol(r.total_volume),
        );
    }
    Ok(())
}

async fn cmd_portfolio(reader: &ProgramReader<RpcAccountSource>, wallet: &Pubkey) -> Result<()> {
    let bets = reader.fetch_user_bets(wallet).await?;
    let mut market_ids: Vec<Pubkey> = bets.iter().map(|b| b.market).collect();
    market_ids.sort();
    market_ids.dedup();
    let markets = reader.fetch_markets_by_address(&market_ids).await?;
    let stats = reader.fetch_user_stats(wallet).await?;
    let now = unix_now();

    println!("[spm] Wallet: {wallet}");
    if let Some(s) = stats {
        println!(
            "[spm] {} bets, {} wins, {} losses, pnl {} SOL",
            s.total_bets,
            s.total_wins,
            s.total_losses,
            format_pnl(s.total_pnl)
        );
    }
    for p in views::portfolio(&bets, &markets) {
        let title = p.market.as_ref().map_or("<unknown market>", |m| m.title.as_str());
        let payout = p
            .estimated_payout
            .map(|l| format!("  ~{} SOL", format_sol(l)))
            .unwrap_or_default();
        println!(
            "  {:<10} {:>10} SOL on {:?}  {}{}  {}",
            p.state.label(),
            format_sol(p.bet.amount),
            p.bet.side,
            title,
            payout,
            format_time_ago(p.bet.created_at, now),
        );
    }
    Ok(())
}

async fn cmd_watch(cfg: &ClientConfig, reader: Arc<ProgramReader<RpcAccountSource>>) -> Result<()> {
    let channel = LiveChannel::new(ChannelConfig::from(cfg));
    channel.on_status_change(|connected| {
        println!("[spm] live: {}", if connected { "connected" } else { "offline" });
    });

    let feed = MarketsFeed::new(reader);
    let mut rx = feed.watch();
    feed.attach(&channel);
    channel.start();
    feed.refresh().await;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                if let Some(err) = &snap.error {
                    eprintln!("[spm] refresh failed: {err}");
                }
                if let (false, Some(markets)) = (snap.loading, snap.value) {
                    let now = unix_now();
                    println!("[spm] {} markets", markets.len());
                    let shown = MarketFilter::default().apply(&markets, now);
                    for m in shown.iter().take(MAX_MARKETS_PER_PAGE) {
                        print_market_row(m, now);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    feed.detach(&channel);
    channel.stop().await;
    Ok(())
}

async fn cmd_bet(
    cfg: &ClientConfig,
    reader: &ProgramReader<RpcAccountSource>,
    args: &[String],
) -> Result<()> {
    let market_addr = parse_pubkey(args.first(), "market address")?;
    let side = args
        .get(1)
        .and_then(|s| Side::parse(s))
        .ok_or_else(|| anyhow!("side must be a or b"))?;
    let sol: f64 = args
        .get(2)
        .ok_or_else(|| anyhow!("missing amount"))?
        .parse()
        .map_err(|_| anyhow!("amount must be a number"))?;
    let lamports = sol_to_lamports(sol)?;

    let wallet = local_wallet(cfg)?;
    let bettor = wallet.connect().await?;
    let market = reader
        .fetch_market(&market_addr)
        .await?
        .ok_or_else(|| anyhow!("market {market_addr} not found"))?;

    let program = SpmProgram::new(cfg.program_id);
    let ix = program.place_bet(&bettor, &market, side, lamports)?;

    println!(
        "[spm] Betting {} SOL on {} in '{}'",
        format_sol(lamports),
        market.side_label(side),
        market.title
    );
    let endpoint = RpcClient::new_with_commitment(cfg.rpc_url.clone(), cfg.commitment);
    let sig = submit(&endpoint, &wallet, &[ix], SubmitOptions::default()).await?;
    println!("[spm] Confirmed: {sig}");
    Ok(())
}
