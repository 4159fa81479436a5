mod args;
mod log;

use ::log::error;
use clap::Parser;
use common::errors::{WalletError, WalletResult};
use common::keys::{WalletKeys, WalletSecret, mainnet_keys};
use common::model::TokenId;
use engine::builder::{OpReturnPayload, Recipient, TransactionBuilder};
use engine::chronik::ChronikClient;
use engine::coin_selection::{CoinSelector, SelectionOptions};
use engine::config::WalletConfig;
use engine::consolidation::{ConsolidationOptions, ConsolidationPlanner};
use engine::indexer::Indexer;
use engine::store::{SpendableFilter, UtxoStore};
use engine::token::{TokenManager, TokenRecipient, display_to_atoms};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args = args::Args::parse();

    let level = ::log::LevelFilter::from_str(&args.logs_level).unwrap_or(::log::LevelFilter::Info);
    if let Err(e) = log::init_log(&args.logs_path, level) {
        panic!("Failed to initialize logger: {e}");
    }

    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("error [{}]: {e}", e.code());
        std::process::exit(1);
    }
}

async fn run(args: args::Args) -> WalletResult<()> {
    let config = WalletConfig::default();
    let chronik = Arc::new(ChronikClient::new(
        args.chronik_urls.clone(),
        config.retry.clone(),
    )?);
    let store = Arc::new(UtxoStore::new(chronik.clone(), config.clone()));

    match args.command {
        args::Commands::Balance { address } => {
            let address = address.parse()?;
            store.init(&address, false).await?;
            let balance = store.total_balance().await;
            println!("confirmed:   {} XEC", xec(balance.confirmed));
            println!("unconfirmed: {} XEC", xec(balance.unconfirmed));
            println!("total:       {} XEC", xec(balance.total));
        }

        args::Commands::Utxos {
            address,
            include_unconfirmed,
        } => {
            let address = address.parse()?;
            store.init(&address, false).await?;
            let state = store.snapshot().await;
            for utxo in &state.utxos {
                if !include_unconfirmed && !utxo.is_confirmed() {
                    continue;
                }
                let classification = state.classifications.get(&utxo.outpoint);
                let buckets = classification
                    .map(|c| {
                        format!(
                            "{:?}/{:?}/{} health={} privacy={}",
                            c.age_bucket, c.value_bucket, c.health_bucket,
                            c.health_score, c.privacy_score
                        )
                    })
                    .unwrap_or_else(|| "unclassified".to_string());
                let token = utxo
                    .token
                    .as_ref()
                    .map(|t| format!(" token={} atoms={}", t.token_id, t.atoms))
                    .unwrap_or_default();
                println!("{} {} sats {buckets}{token}", utxo.outpoint, utxo.sats);
            }
        }

        args::Commands::Health { address, fee_rate } => {
            let parsed = address.parse()?;
            store.init(&parsed, false).await?;
            let fee_rate = fee_rate.unwrap_or(config.fee_rate());
            let report = store.health_report(fee_rate).await;
            println!(
                "{} UTXOs, {} XEC total ({:.1}% spendable at {fee_rate} sats/byte)",
                report.summary.total_utxos,
                xec(report.summary.total_sats as u64),
                report.summary.spendable_pct
            );
            for (status, count) in &report.summary.counts_by_status {
                println!("  {status}: {count}");
            }
            for alert in &report.alerts {
                println!("alert [{:?}] {}: {}", alert.severity, alert.kind.code(), alert.message);
            }
            for recommendation in &report.recommendations {
                println!(
                    "recommend [{:?}] {}: {}",
                    recommendation.priority, recommendation.action, recommendation.message
                );
            }
            let pattern = store.detect_dust_attack(&parsed).await;
            println!("dust attack severity: {:?}", pattern.severity);
            for indicator in &pattern.indicators {
                println!("  indicator: {indicator}");
            }
        }

        args::Commands::Tokens { address } => {
            let address = address.parse()?;
            store.init(&address, false).await?;
            let state = store.snapshot().await;
            let manager = TokenManager::new(chronik.clone());
            for balance in manager.list_tokens(&state.utxos).await {
                println!(
                    "{} {} {} ({} UTXOs, protocol {})",
                    balance.token_id,
                    balance.display,
                    balance.ticker,
                    balance.utxo_count,
                    balance
                        .protocol
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "UNKNOWN".to_string()),
                );
            }
        }

        args::Commands::Send {
            to_address,
            send_amount,
            send_all,
            mnemonic,
            wif,
            fee_rate,
            op_return,
            show_serialized,
        } => {
            let keys = load_keys(mnemonic, wif)?;
            let to = to_address.parse()?;
            let fee_rate = fee_rate.unwrap_or(config.fee_rate());
            let wallet_address = keys.address().clone();
            store.init(&wallet_address, false).await?;
            let builder = TransactionBuilder::new(keys);

            let built = if send_all {
                let candidates = store
                    .spendable_plain_utxos(&SpendableFilter::default())
                    .await;
                builder.build_send_all(&candidates, &to, fee_rate)?
            } else {
                let amount = send_amount.ok_or_else(|| {
                    WalletError::InvalidUtxoStructure(
                        "either --send-amount or --send-all is required".to_string(),
                    )
                })?;
                let sats = xec_to_sats(&amount)?;
                let payload = op_return
                    .map(|message| OpReturnPayload::with_default_prefix(message.into_bytes()));
                let extra_overhead = payload
                    .as_ref()
                    .map(|p| p.prefix.len() + p.message.len() + 3)
                    .unwrap_or(0);

                let state = store.snapshot().await;
                let candidates = store
                    .spendable_plain_utxos(&SpendableFilter::default())
                    .await;
                let plan = CoinSelector::new(config.selection.clone()).select(
                    &candidates,
                    sats,
                    fee_rate,
                    &SelectionOptions {
                        extra_overhead,
                        ..SelectionOptions::default()
                    },
                    Some(&state.classifications),
                )?;
                let recipients = [Recipient::new(to, sats)];
                match payload {
                    Some(payload) => builder.build_op_return(&plan, &recipients, &payload)?,
                    None => builder.build_plain(&plan, &recipients)?,
                }
            };

            if show_serialized {
                println!("{}", built.hex);
            } else {
                let txid = chronik.broadcast_tx(&built.tx.serialize()).await?;
                println!("broadcast {txid} (fee {} sats)", built.fee);
            }
        }

        args::Commands::SendToken {
            token_id,
            to_address,
            amount,
            mnemonic,
            wif,
            fee_rate,
            show_serialized,
        } => {
            let keys = load_keys(mnemonic, wif)?;
            let token_id: TokenId = token_id.parse()?;
            let to = to_address.parse()?;
            let fee_rate = fee_rate.unwrap_or(config.fee_rate());
            let wallet_address = keys.address().clone();
            store.init(&wallet_address, false).await?;
            let state = store.snapshot().await;
            let builder = TransactionBuilder::new(keys);
            let manager = TokenManager::new(chronik.clone());

            let info = manager.token_info(&token_id).await?;
            let atoms = display_to_atoms(&amount, info.genesis.decimals)?;
            let recipients = [TokenRecipient::new(to, atoms)];
            let built = manager
                .send(&builder, &state.utxos, &token_id, &recipients, fee_rate)
                .await?;

            if show_serialized {
                println!("{}", built.hex);
            } else {
                let txid = chronik.broadcast_tx(&built.tx.serialize()).await?;
                println!("broadcast {txid} ({amount} {})", info.genesis.ticker);
            }
        }

        args::Commands::BurnToken {
            token_id,
            amount,
            mnemonic,
            wif,
            fee_rate,
            show_serialized,
        } => {
            let keys = load_keys(mnemonic, wif)?;
            let token_id: TokenId = token_id.parse()?;
            let fee_rate = fee_rate.unwrap_or(config.fee_rate());
            let wallet_address = keys.address().clone();
            store.init(&wallet_address, false).await?;
            let state = store.snapshot().await;
            let builder = TransactionBuilder::new(keys);
            let manager = TokenManager::new(chronik.clone());

            let info = manager.token_info(&token_id).await?;
            let atoms = display_to_atoms(&amount, info.genesis.decimals)?;
            let built = manager
                .burn(&builder, &state.utxos, &token_id, atoms, fee_rate)
                .await?;

            if show_serialized {
                println!("{}", built.hex);
            } else {
                let txid = chronik.broadcast_tx(&built.tx.serialize()).await?;
                println!("burnt {amount} {} in {txid}", info.genesis.ticker);
            }
        }

        args::Commands::Consolidate {
            mnemonic,
            wif,
            fee_rate,
            dry_run,
            value_ceiling,
            max_inputs,
        } => {
            let keys = load_keys(mnemonic, wif)?;
            let fee_rate = fee_rate.unwrap_or(config.fee_rate());
            let wallet_address = keys.address().clone();
            store.init(&wallet_address, false).await?;
            let state = store.snapshot().await;
            let builder = TransactionBuilder::new(keys);

            let mut options = ConsolidationOptions::from_config(&config.consolidation, fee_rate);
            options.dry_run = dry_run;
            if let Some(ceiling) = value_ceiling {
                options.value_ceiling_sats = ceiling;
            }
            if let Some(max_inputs) = max_inputs {
                options.max_inputs_per_tx = max_inputs;
            }

            let planner = ConsolidationPlanner::new(chronik.clone(), config.consolidation.clone());
            let plan = planner.plan(&state.utxos, &options);
            println!(
                "{} candidates in {} batches; current {} sats, consolidation {} sats, future {} sats, savings {} sats",
                plan.candidates_considered,
                plan.batches.len(),
                plan.current_cost,
                plan.consolidation_cost,
                plan.future_cost,
                plan.estimated_savings(),
            );
            if !plan.recommended {
                println!("consolidation is not recommended at this fee rate");
            }
            let outcomes = planner
                .execute(&builder, &plan, &options, Some(&store), &wallet_address)
                .await?;
            for outcome in outcomes {
                match (outcome.txid, outcome.error) {
                    (Some(txid), _) => println!("batch {}: {txid}", outcome.batch_index),
                    (None, Some(e)) => println!("batch {}: failed: {e}", outcome.batch_index),
                    (None, None) => {}
                }
            }
        }
    }
    Ok(())
}

fn load_keys(mnemonic: Option<String>, wif: Option<String>) -> WalletResult<WalletKeys> {
    mainnet_keys(&WalletSecret {
        mnemonic,
        hd_path: None,
        wif,
    })
}

/// Sats rendered as a decimal XEC amount (1 XEC = 100 sats).
fn xec(sats: u64) -> Decimal {
    Decimal::from(sats) / Decimal::from(100)
}

/// Parses a decimal XEC amount into sats, rejecting sub-sat precision.
fn xec_to_sats(amount: &str) -> WalletResult<u64> {
    let invalid = || WalletError::InvalidUtxoStructure(format!("invalid XEC amount {amount:?}"));
    let decimal = Decimal::from_str(amount).map_err(|_| invalid())?;
    let sats = decimal * Decimal::from(100);
    if sats.is_sign_negative() || sats.fract() != Decimal::ZERO {
        return Err(invalid());
    }
    sats.to_u64().ok_or_else(invalid)
}
