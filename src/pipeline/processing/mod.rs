// Pipeline processing: normalization, continuity, reconciliation and resolution

pub mod continuity;
pub mod normalize;
pub mod reconcile;
pub mod resolve;
pub mod warning;
