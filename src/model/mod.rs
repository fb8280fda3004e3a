pub mod fold;
pub mod prediction;
pub mod rate_pair;
pub mod report;
pub mod spillover;

pub use fold::{ExcludedFold, FoldOutcome, ScoredPoint, ValidationFold};
pub use prediction::{ErrorResponse, PredictRequest, PredictResponse, Prediction, UncertaintyBand};
pub use rate_pair::{RateObservation, RatePair};
pub use report::{CertificationReport, EconomicRule, FoldSummary};
pub use spillover::{SpilloverPoint, SpilloverSeries};
