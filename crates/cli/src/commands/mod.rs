//! Subcommand implementations.

pub mod carrier;
pub mod cart;
pub mod checkout;
pub mod lookup;
pub mod quote;
pub mod track;

use std::error::Error;
use std::fmt;

use vitrine_storefront::error::StorefrontError;

/// A storefront error the checkout has already logged and reported.
#[derive(Debug)]
pub struct Reported(pub StorefrontError);

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for Reported {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}
