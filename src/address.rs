//! Address resolution: free-text query in, place ID and normalized address out.

use serde::Serialize;

use crate::error::{Error, ResolutionError, Result};
use crate::places::{AddressComponent, PlaceDetails, TextSearch};

/// Address fragments as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressQuery {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl AddressQuery {
    /// The Text Search query: street, city, state and zip joined by single
    /// spaces. Empty fields are kept, so they show up as doubled spaces.
    pub fn search_text(&self) -> String {
        format!("{} {} {} {}", self.street, self.city, self.state, self.zip)
    }

    /// True when every field is the empty string. Whitespace counts as
    /// content and is searched as given.
    pub fn is_empty(&self) -> bool {
        [&self.street, &self.city, &self.state, &self.zip]
            .iter()
            .all(|f| f.is_empty())
    }
}

/// Normalized address derived from Place Details. Missing parts are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuredAddress {
    pub street_number: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl StructuredAddress {
    /// Take the short name of each tagged component. A tag seen more than
    /// once keeps the last value.
    pub fn from_components(components: &[AddressComponent]) -> Self {
        let mut address = Self::default();
        for comp in components {
            if comp.has_type("postal_code") {
                address.zip = comp.short_name.clone();
            }
            if comp.has_type("street_number") {
                address.street_number = comp.short_name.clone();
            }
            if comp.has_type("route") {
                address.street = comp.short_name.clone();
            }
            if comp.has_type("administrative_area_level_1") {
                address.state = comp.short_name.clone();
            }
            if comp.has_type("locality") {
                address.city = comp.short_name.clone();
            }
        }
        address
    }

    /// Street number and route as a single line, e.g. "123 Main St".
    pub fn street_line(&self) -> String {
        [self.street_number.as_str(), self.street.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Search for the query, take the best match and fetch its components.
///
/// Returns the canonical place ID together with the derived address.
pub async fn resolve(
    search: &dyn TextSearch,
    details: &dyn PlaceDetails,
    query: &AddressQuery,
) -> Result<(String, StructuredAddress)> {
    if query.is_empty() {
        return Err(Error::Input(
            "at least one of street, city, state or zip is required"
                .to_string(),
        ));
    }

    let text = query.search_text();
    tracing::info!(query = %text, "Searching for place");

    let results = search.text_search(&text).await?;
    let first = results
        .into_iter()
        .next()
        .ok_or(ResolutionError::NoResults { query: text })?;
    tracing::info!(place_id = %first.place_id, "Resolved place");

    let place = details.place_details(&first.place_id).await?;
    let address = StructuredAddress::from_components(&place.address_components);
    tracing::info!(
        street_number = %address.street_number,
        street = %address.street,
        city = %address.city,
        state = %address.state,
        zip = %address.zip,
        "Structured address"
    );

    Ok((first.place_id, address))
}
