//! Address lookup and CEP detection.
//!
//! # Usage
//!
//! ```bash
//! vitrine cep 01310-100
//! vitrine locate --lat -23.5614 --lon -46.6559
//! vitrine locate
//! ```

use tracing::{debug, info};
use vitrine_storefront::services::{CepAddress, CepLookupError, Coordinates, GeolocationError};
use vitrine_storefront::state::AppState;

/// Print the address for a CEP.
pub async fn cep(state: &AppState, input: &str) -> Result<(), CepLookupError> {
    let address = state.cep().lookup(input).await?;
    log_address(&address);
    Ok(())
}

/// Detect the buyer's CEP from coordinates, or from the IP address.
pub async fn locate(
    state: &AppState,
    coordinates: Option<(f64, f64)>,
) -> Result<(), GeolocationError> {
    let coordinates = coordinates.map(|(latitude, longitude)| Coordinates {
        latitude,
        longitude,
    });
    let (cep, provider) = state.locator().locate(coordinates).await?;
    info!(provider, "Detected CEP {}", cep.formatted());

    // The street is a bonus; the CEP alone is the answer.
    match state.cep().lookup(cep.as_str()).await {
        Ok(address) => log_address(&address),
        Err(e) => debug!(error = %e, "no address for detected CEP"),
    }
    Ok(())
}

fn log_address(address: &CepAddress) {
    info!(
        cep = %address.cep.formatted(),
        region = %address.cep.region(),
        "{}, {} - {}/{}",
        address.street,
        address.neighborhood,
        address.city,
        address.state
    );
    if !address.complement.is_empty() {
        info!(complement = %address.complement);
    }
}
