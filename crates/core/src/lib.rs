#![doc = include_str!("../README.md")]

pub mod lifecycle;
pub mod metrics;
pub mod queue;

pub mod prelude {
    pub use crate::{
        lifecycle::{Lifecycle, LifecycleState},
        metrics::Metrics,
        queue::{MailboxRx, MailboxTx, RecvOutcome, SendOutcome, latest},
    };
}
