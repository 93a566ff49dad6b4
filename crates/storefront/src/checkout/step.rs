//! Checkout steps and the transitions between them.

use std::fmt;

use serde::Serialize;

/// A step in the checkout pipeline.
///
/// `address → payment → confirmation → processing → {success | error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStep {
    #[default]
    Address,
    Payment,
    Confirmation,
    Processing,
    Success,
    Error,
}

/// Result of a "go back" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepChange {
    Moved(CheckoutStep),
    /// Back from the first step: the buyer is leaving checkout.
    Exit,
    Unchanged,
}

impl CheckoutStep {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Payment => "payment",
            Self::Confirmation => "confirmation",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// The step a guarded "next" leads to.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Address => Some(Self::Payment),
            Self::Payment => Some(Self::Confirmation),
            Self::Confirmation => Some(Self::Processing),
            Self::Processing | Self::Success | Self::Error => None,
        }
    }

    /// Where "back" leads from this step.
    #[must_use]
    pub const fn previous(self) -> StepChange {
        match self {
            Self::Address => StepChange::Exit,
            Self::Payment => StepChange::Moved(Self::Address),
            Self::Confirmation => StepChange::Moved(Self::Payment),
            Self::Processing | Self::Error => StepChange::Moved(Self::Confirmation),
            Self::Success => StepChange::Unchanged,
        }
    }

    /// Whether the buyer can still change selections.
    #[must_use]
    pub const fn is_editable(self) -> bool {
        matches!(self, Self::Address | Self::Payment | Self::Confirmation)
    }
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let mut step = CheckoutStep::default();
        let mut visited = vec![step];
        while let Some(next) = step.next() {
            step = next;
            visited.push(step);
        }
        assert_eq!(
            visited,
            [
                CheckoutStep::Address,
                CheckoutStep::Payment,
                CheckoutStep::Confirmation,
                CheckoutStep::Processing
            ]
        );
    }

    #[test]
    fn test_back_transitions() {
        assert_eq!(CheckoutStep::Address.previous(), StepChange::Exit);
        assert_eq!(
            CheckoutStep::Error.previous(),
            StepChange::Moved(CheckoutStep::Confirmation)
        );
        assert_eq!(
            CheckoutStep::Processing.previous(),
            StepChange::Moved(CheckoutStep::Confirmation)
        );
        assert_eq!(CheckoutStep::Success.previous(), StepChange::Unchanged);
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(CheckoutStep::Confirmation.to_string(), "confirmation");
    }
}
