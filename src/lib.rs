use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod address;
pub mod auth;
pub mod config;
pub mod crm;
pub mod error;
pub mod places;

use address::{AddressQuery, StructuredAddress};
use auth::{OAuthClient, TokenExchange};
use config::{Config, GrantParams};
use crm::{
    CrmClient, PatchByExternalId, PropertyRecord, RecordQuery, UpsertOutcome,
    UpsertResponse,
};
use places::{GooglePlaces, PlaceDetails, TextSearch};

/// Look up a street address with the Google Places API and write the
/// normalized address onto the Salesforce `Property__c` record whose
/// `Place_ID__c` matches the place found.
///
/// Credentials are read from the environment (or a `.env` file):
/// `PLACES_API_KEY`, `CRM_CLIENT_ID`, `CRM_CLIENT_SECRET`, `CRM_USERNAME`,
/// `CRM_PASSWORD` and optionally `CRM_SECURITY_TOKEN`.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Street line, e.g. "123 Main St"
    #[arg(long, default_value = "")]
    street: String,

    /// City or locality, e.g. "Beverly Hills"
    #[arg(long, default_value = "")]
    city: String,

    /// State or region code
    #[arg(long, default_value = "")]
    state: String,

    /// Postal code
    #[arg(long, default_value = "")]
    zip: String,

    /// Send the upsert even when the existing record already matches
    #[arg(long)]
    force: bool,
}

impl Cli {
    fn query(&self) -> AddressQuery {
        AddressQuery {
            street: self.street.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip.clone(),
        }
    }
}

/// Run the command-line interface
pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::debug!(?config, "Loaded configuration");

    let enricher = Enricher::from_config(&config)?;
    let outcome = enricher.run(&cli.query(), cli.force).await?;
    report(&outcome);
    Ok(())
}

/// The shared HTTP client: one cookie jar for the whole run and a deadline
/// on every request.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// What the run did to the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Upserted {
        place_id: String,
        address: StructuredAddress,
        response: UpsertResponse,
    },
    Unchanged {
        place_id: String,
        address: StructuredAddress,
        record_id: Option<String>,
    },
}

/// The four stages wired to their collaborators.
pub struct Enricher {
    text_search: Box<dyn TextSearch>,
    place_details: Box<dyn PlaceDetails>,
    token_exchange: Box<dyn TokenExchange>,
    record_query: Box<dyn RecordQuery>,
    patch: Box<dyn PatchByExternalId>,
    grant: GrantParams,
}

impl Enricher {
    pub fn new(
        text_search: Box<dyn TextSearch>,
        place_details: Box<dyn PlaceDetails>,
        token_exchange: Box<dyn TokenExchange>,
        record_query: Box<dyn RecordQuery>,
        patch: Box<dyn PatchByExternalId>,
        grant: GrantParams,
    ) -> Self {
        Self {
            text_search,
            place_details,
            token_exchange,
            record_query,
            patch,
            grant,
        }
    }

    /// Wire the live Google Places and Salesforce clients, all sharing one
    /// HTTP client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = http_client(config.http_timeout)?;
        Ok(Self::new(
            Box::new(GooglePlaces::new(
                http.clone(),
                &config.places_base_url,
                &config.places_api_key,
            )),
            Box::new(GooglePlaces::new(
                http.clone(),
                &config.places_base_url,
                &config.places_api_key,
            )),
            Box::new(OAuthClient::new(http.clone(), &config.token_url)),
            Box::new(CrmClient::new(
                http.clone(),
                &config.api_version,
                config.instance_url.clone(),
            )),
            Box::new(CrmClient::new(
                http,
                &config.api_version,
                config.instance_url.clone(),
            )),
            config.grant.clone(),
        ))
    }

    /// Resolve, authenticate, then upsert. Stops at the first error.
    pub async fn run(
        &self,
        query: &AddressQuery,
        force: bool,
    ) -> error::Result<Outcome> {
        let (place_id, address) = address::resolve(
            &*self.text_search,
            &*self.place_details,
            query,
        )
        .await?;

        let credentials =
            auth::acquire(&*self.token_exchange, &self.grant).await?;

        let record = PropertyRecord::from_address(&address);
        let outcome = crm::upsert(
            &*self.record_query,
            &*self.patch,
            &credentials,
            &place_id,
            &record,
            force,
        )
        .await?;

        Ok(match outcome {
            UpsertOutcome::Written(response) => Outcome::Upserted {
                place_id,
                address,
                response,
            },
            UpsertOutcome::Unchanged { record_id } => Outcome::Unchanged {
                place_id,
                address,
                record_id,
            },
        })
    }
}

/// Log the final result.
pub fn report(outcome: &Outcome) {
    match outcome {
        Outcome::Upserted {
            place_id, response, ..
        } => tracing::info!(
            place_id = %place_id,
            record_id = response.id.as_deref().unwrap_or(""),
            created = response.created.unwrap_or(false),
            ?response,
            "Upsert complete"
        ),
        Outcome::Unchanged {
            place_id,
            record_id,
            ..
        } => tracing::info!(
            place_id = %place_id,
            record_id = record_id.as_deref().unwrap_or(""),
            "Record already up to date, nothing written"
        ),
    }
}
