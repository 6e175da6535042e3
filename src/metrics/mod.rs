//! Step-level training metrics: running meters and top-k accuracy.

pub mod accuracy;
pub mod meter;

pub use accuracy::topk_accuracy;
pub use meter::AverageMeter;
