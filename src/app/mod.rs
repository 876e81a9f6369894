pub mod ports;
pub mod reconcile_use_case;
pub mod retry;
