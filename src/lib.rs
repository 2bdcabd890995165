/// Logs at a level only known at runtime
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
	let level = $level;
	if level == ::tracing::Level::ERROR {
	    ::tracing::error!( $($arg)+ );
	} else if level == ::tracing::Level::WARN {
	    ::tracing::warn!( $($arg)+ );
	} else if level == ::tracing::Level::INFO {
	    ::tracing::info!( $($arg)+ );
	} else if level == ::tracing::Level::DEBUG {
	    ::tracing::debug!( $($arg)+ );
	} else {
	    ::tracing::trace!( $($arg)+ );
	}
    }};
}

pub mod bias;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod proposal;
pub mod sampler;
pub mod schedule;

use tracing::*;

pub use bias::Bias;
pub use data::{Database, DatabaseBuilder, Item, Itemvec, Label, Tid, TidList, Transaction, TransactionDatabase};
pub use error::Error;
pub use proposal::{ChainState, Draw, Proposal, StarMove, TransactionMove};
pub use sampler::{CancellationToken, Coalesced, Epoch, EpochLimits, Sample, Sampler, SamplerConfig, SamplingMode};
pub use schedule::{BlockSizePolicy, BlockSizeSchedule};

/// Objects that can be recorded in the log
pub trait Loggable {
    fn log(&self, message: &str, level: tracing::Level );
}
