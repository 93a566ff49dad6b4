//! Carrier account authorization.
//!
//! The store's carrier account must be authorized once before real quotes
//! are available; until then checkout offers the regional rate.
//!
//! # Usage
//!
//! ```bash
//! vitrine carrier status
//! vitrine carrier authorize
//! # open the printed link, then paste the `code` and `state` it redirects with
//! vitrine carrier complete --code abc --state XYZ --expected-state XYZ
//! ```

use std::error::Error;

use tracing::{info, warn};
use vitrine_storefront::error::StorefrontError;
use vitrine_storefront::services::ShippingService;
use vitrine_storefront::state::AppState;

pub async fn status(state: &AppState) -> Result<(), StorefrontError> {
    if state.shipping().authorization_status().await? {
        info!("Carrier account is authorized");
    } else {
        warn!("Carrier account is not authorized; run `vitrine carrier authorize`");
    }
    Ok(())
}

/// Print the authorization link and the state to check the redirect with.
pub fn authorize(state: &AppState) -> Result<(), Box<dyn Error>> {
    let authorization = state
        .carrier_authorization()
        .ok_or("Carrier app is not configured (MELHORENVIO_CLIENT_ID, MELHORENVIO_REDIRECT_URI)")?;
    let (url, expected_state) = authorization.start()?;
    info!(%expected_state, "Open this link to authorize the carrier account: {url}");
    Ok(())
}

pub async fn complete(
    state: &AppState,
    code: &str,
    returned_state: &str,
    expected_state: &str,
) -> Result<(), StorefrontError> {
    state
        .shipping()
        .complete_authorization(code, returned_state, expected_state)
        .await?;
    info!("Carrier account authorized");
    Ok(())
}
