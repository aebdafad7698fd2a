use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use arca_core::config::{Config, EnvironmentType};
use arca_core::csr::CsrProperties;
use arca_core::wsaa::AuthorizationTicketProvider;
use arca_core::wsfe::WsfeClient;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arca")]
#[command(about = "Command line client for ARCA (AFIP) web services")]
#[command(version)]
struct Cli {
    /// Target environment, `testing` or `production`. Overrides ARCA_ENV.
    #[arg(long, global = true)]
    env: Option<String>,

    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request an authorization ticket and print it as JSON.
    Ticket {
        #[arg(long, default_value = "wsfe")]
        service: String,
    },
    /// Print the number of the last authorized invoice.
    LastInvoice {
        #[arg(long)]
        point_of_sale: u32,
        #[arg(long)]
        invoice_type: u32,
    },
    /// List the points of sale enabled for web services.
    PointsOfSale,
    /// List the VAT conditions a recipient can declare.
    VatConditions,
    /// Print an authorized invoice as JSON.
    InvoiceDetails {
        #[arg(long)]
        point_of_sale: u32,
        #[arg(long)]
        invoice_type: u32,
        #[arg(long)]
        number: u64,
    },
    /// List the optional data types an invoice can carry.
    OptionalTypes,
    /// Generate a private key and a CSR to request the certificate from ARCA.
    Csr {
        #[arg(long)]
        organization: String,
        #[arg(long)]
        application: String,
        #[arg(long)]
        cuit: String,
        /// Defaults to `arca/certificates/<cuit>`.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "arca_core=debug,arca=debug",
        _ => "arca_core=trace,arca=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(env: Option<&str>) -> Result<Config> {
    // --env stands in for ARCA_ENV so URL overrides land on the chosen environment.
    let env = env.map(EnvironmentType::from_str).transpose()?;
    let config = Config::from_lookup(|key| match (key, env) {
        ("ARCA_ENV", Some(env)) => Some(env.as_str().to_string()),
        _ => std::env::var(key).ok(),
    })
    .context("reading ARCA_* configuration")?;
    tracing::debug!(env = %config.env(), cuit = config.cuit(), "loaded configuration");
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Ticket { service } => {
            let config = load_config(cli.env.as_deref())?;
            let provider = AuthorizationTicketProvider::from_config(&config)?;
            let ticket = provider.authorization_ticket(&service).await?;
            print_json(&ticket)?;
        }
        Commands::LastInvoice {
            point_of_sale,
            invoice_type,
        } => {
            let client = wsfe_client(cli.env.as_deref())?;
            let number = client
                .last_authorized_invoice(point_of_sale, invoice_type)
                .await?;
            print_json(&serde_json::json!({
                "point_of_sale": point_of_sale,
                "invoice_type": invoice_type,
                "last_invoice": number,
            }))?;
        }
        Commands::PointsOfSale => {
            let client = wsfe_client(cli.env.as_deref())?;
            print_json(&client.points_of_sale().await?)?;
        }
        Commands::VatConditions => {
            let client = wsfe_client(cli.env.as_deref())?;
            print_json(&client.recipient_vat_conditions().await?)?;
        }
        Commands::InvoiceDetails {
            point_of_sale,
            invoice_type,
            number,
        } => {
            let client = wsfe_client(cli.env.as_deref())?;
            let invoice = client
                .invoice_details(point_of_sale, invoice_type, number)
                .await?;
            print_json(&invoice)?;
        }
        Commands::OptionalTypes => {
            let client = wsfe_client(cli.env.as_deref())?;
            print_json(&client.optional_types().await?)?;
        }
        Commands::Csr {
            organization,
            application,
            cuit,
            out_dir,
        } => {
            let props = CsrProperties::new(organization, application, cuit)?;
            let dir = out_dir.unwrap_or_else(|| {
                PathBuf::from("arca")
                    .join("certificates")
                    .join(props.clean_cuit())
            });
            let files = props.write_to_dir(&dir)?;
            println!("private key: {}", files.private_key.display());
            println!("csr: {}", files.csr.display());
        }
    }

    Ok(())
}

fn wsfe_client(env: Option<&str>) -> Result<WsfeClient> {
    let config = load_config(env)?;
    let provider = Arc::new(AuthorizationTicketProvider::from_config(&config)?);
    Ok(WsfeClient::from_config(&config, provider)?)
}
