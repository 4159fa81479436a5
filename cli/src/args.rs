use clap::{Parser, Subcommand};

pub const DEFAULT_CHRONIK_URL: &str = "https://chronik.e.cash";

#[derive(Parser)]
#[command(name = "xec-wallet-cli")]
#[command(about = "Minimal XEC wallet CLI", long_about = None)]
pub struct Args {
    /// Indexer endpoint (can be specified multiple times for failover)
    #[arg(short = 'c', long = "chronik-url", default_value = DEFAULT_CHRONIK_URL, global = true)]
    pub chronik_urls: Vec<String>,

    /// Directory for log files
    #[arg(long = "logs-path", default_value = "logs", global = true)]
    pub logs_path: String,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long = "logs-level", default_value = "info", global = true)]
    pub logs_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Shows the confirmed/unconfirmed balance of an address
    Balance {
        /// The address to inspect
        #[arg(short = 'a', long = "address")]
        address: String,
    },

    /// Lists the UTXO set of an address with classifications
    Utxos {
        #[arg(short = 'a', long = "address")]
        address: String,

        /// Include unconfirmed UTXOs
        #[arg(long = "include-unconfirmed")]
        include_unconfirmed: bool,
    },

    /// Prints the wallet health report and dust-attack analysis
    Health {
        #[arg(short = 'a', long = "address")]
        address: String,

        /// Fee rate in sats/byte used for economy checks
        #[arg(short = 'r', long = "fee-rate")]
        fee_rate: Option<f64>,
    },

    /// Lists token balances held by an address
    Tokens {
        #[arg(short = 'a', long = "address")]
        address: String,
    },

    /// Sends XEC to a public address
    Send {
        /// The recipient address
        #[arg(short = 't', long = "to-address")]
        to_address: String,

        /// Amount to send in XEC (e.g. 12.34), conflicts with --send-all
        #[arg(short = 'v', long = "send-amount", conflicts_with = "send_all")]
        send_amount: Option<String>,

        /// Sweep the whole wallet to the recipient
        #[arg(long = "send-all", conflicts_with = "send_amount")]
        send_all: bool,

        /// BIP39 mnemonic (preferred over --wif)
        #[arg(short = 'm', long = "mnemonic")]
        mnemonic: Option<String>,

        /// WIF or 64-hex private key
        #[arg(short = 'w', long = "wif")]
        wif: Option<String>,

        /// Fee rate in sats/byte
        #[arg(short = 'r', long = "fee-rate")]
        fee_rate: Option<f64>,

        /// Attach an OP_RETURN message (UTF-8)
        #[arg(long = "op-return")]
        op_return: Option<String>,

        /// Print the raw transaction instead of broadcasting
        #[arg(short = 's', long = "show-serialized")]
        show_serialized: bool,
    },

    /// Sends tokens to a recipient
    SendToken {
        /// Token id (genesis transaction id)
        #[arg(short = 'i', long = "token-id")]
        token_id: String,

        #[arg(short = 't', long = "to-address")]
        to_address: String,

        /// Amount in display units (e.g. 1.5)
        #[arg(short = 'v', long = "amount")]
        amount: String,

        #[arg(short = 'm', long = "mnemonic")]
        mnemonic: Option<String>,

        #[arg(short = 'w', long = "wif")]
        wif: Option<String>,

        #[arg(short = 'r', long = "fee-rate")]
        fee_rate: Option<f64>,

        #[arg(short = 's', long = "show-serialized")]
        show_serialized: bool,
    },

    /// Burns tokens
    BurnToken {
        #[arg(short = 'i', long = "token-id")]
        token_id: String,

        /// Amount in display units
        #[arg(short = 'v', long = "amount")]
        amount: String,

        #[arg(short = 'm', long = "mnemonic")]
        mnemonic: Option<String>,

        #[arg(short = 'w', long = "wif")]
        wif: Option<String>,

        #[arg(short = 'r', long = "fee-rate")]
        fee_rate: Option<f64>,

        #[arg(short = 's', long = "show-serialized")]
        show_serialized: bool,
    },

    /// Consolidates small UTXOs back to the wallet address
    Consolidate {
        #[arg(short = 'm', long = "mnemonic")]
        mnemonic: Option<String>,

        #[arg(short = 'w', long = "wif")]
        wif: Option<String>,

        #[arg(short = 'r', long = "fee-rate")]
        fee_rate: Option<f64>,

        /// Plan only; broadcast nothing
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Largest UTXO value (sats) to include
        #[arg(long = "value-ceiling")]
        value_ceiling: Option<u64>,

        /// Maximum inputs per consolidation transaction
        #[arg(long = "max-inputs")]
        max_inputs: Option<usize>,
    },
}
