use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::*;
use crate::error::{Error, Result};

mod epoch;

pub use epoch::{Coalesced, Epoch, EpochLimits};

/// Item count above which lattice epochs rarely land on a supported itemset
const LATTICE_ITEMS_HINT: usize = 24;

/// How an epoch turns into a sample.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum SamplingMode {
    /// Coupling over the item lattice, rejecting itemsets outside the pattern language.
    /// Only practical while the supported itemsets are a sizeable share of the lattice.
    #[default]
    Lattice,
    /// Coupling over the transactions, then a subset of the chosen one.
    /// Targets the bias product times the weighted support and never rejects.
    TwoStep,
}

/// Everything a sampler can be configured with. Missing JSON fields take the defaults.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct SamplerConfig {
    /// weight every item gets
    pub global_bias: f64,
    /// per-item factors on top of the global weight
    pub item_bias: FxHashMap<Item, f64>,
    /// preference for itemsets with a large weighted positive support, 0 for none
    pub support_tilt: f64,
    pub schedule: BlockSizePolicy,
    /// number of windows one epoch may try
    pub max_attempts: usize,
    /// longest backward window one epoch may simulate
    pub max_window: usize,
    /// samples with fewer items are rejected
    pub min_length: usize,
    /// epochs that may be rejected for one sample before giving up
    pub max_rejections: usize,
    pub seed: u64,
    pub parallel_chains: bool,
    pub mode: SamplingMode,
}

impl Default for SamplerConfig {
    fn default() -> Self {
	SamplerConfig{
	    global_bias: 1.0,
	    item_bias: FxHashMap::default(),
	    support_tilt: 0.0,
	    schedule: BlockSizePolicy::default(),
	    max_attempts: 32,
	    max_window: 1 << 22,
	    min_length: 0,
	    max_rejections: 10_000,
	    seed: 2012,
	    parallel_chains: true,
	    mode: SamplingMode::default(),
	}
    }
}

impl SamplerConfig {

    /// Reads a JSON configuration
    pub fn from_json_file( path: &str ) -> Result<SamplerConfig> {
	let file = std::fs::File::open( Path::new( path ))?;
	let config: SamplerConfig = serde_json::from_reader( std::io::BufReader::new( file ))?;
	Ok( config )
    }

    pub fn bias( &self ) -> Result<Bias> {
	Bias::with_overrides( self.global_bias, self.item_bias.iter().map( |(item, weight)| (*item, *weight) ))
    }

    pub fn limits( &self ) -> EpochLimits {
	EpochLimits{
	    max_attempts: self.max_attempts,
	    max_window: self.max_window,
	    parallel_chains: self.parallel_chains,
	}
    }

    fn validate( &self ) -> Result<()> {
	if self.max_attempts == 0 {
	    return Err( Error::Config( "max_attempts must be at least 1".to_string() ));
	}
	let first_window = self.schedule.window( 0 );
	if self.max_window < first_window {
	    return Err( Error::Config( format!( "max_window {} is below the first window {}", self.max_window, first_window )));
	}
	if self.mode == SamplingMode::TwoStep && self.support_tilt != 0.0 {
	    return Err( Error::Config( "two-step sampling does not support a support tilt".to_string() ));
	}
	Ok( () )
    }
}

/// Shared flag to stop running epochs, optionally with a deadline.
/// Cancelled epochs fail with `Error::Cancelled`.
#[derive( Debug, Clone, Default )]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
	CancellationToken::default()
    }

    /// Token sharing the flag that also expires at `deadline`, or at its own earlier one
    pub fn with_deadline( &self, deadline: Instant ) -> CancellationToken {
	CancellationToken{
	    cancelled: Arc::clone( &self.cancelled ),
	    deadline: Some( self.deadline.map_or( deadline, |own| own.min( deadline ))),
	}
    }

    pub fn deadline( &self ) -> Option<Instant> {
	self.deadline
    }

    pub fn cancel( &self ) {
	self.cancelled.store( true, Ordering::Release );
    }

    pub fn is_cancelled( &self ) -> bool {
	self.cancelled.load( Ordering::Acquire ) || self.deadline.map_or( false, |deadline| Instant::now() >= deadline )
    }
}

/// An exact draw from the target distribution over the pattern language.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct Sample {
    pub items: Itemvec,
    pub support: TidList,
    /// backward window of the accepted epoch
    pub window: usize,
    /// windows simulated by the accepted epoch
    pub attempts: usize,
    /// epochs rejected before this one
    pub rejections: usize,
}

impl Loggable for Sample {
    fn log( &self, message: &str, level: Level ) {
	log_at!( level, "{message}: {:?} (support {}, window {}, {} rejected)", self.items, self.support.cardinality(), self.window, self.rejections );
    }
}

/// Draws exact samples of supported itemsets.
///
/// In lattice mode every epoch yields an exact draw of the lattice measure of
/// its `StarMove`. Draws outside of the pattern language (unsupported, or
/// shorter than `min_length`) are rejected and a new independent epoch is
/// started, which conditions the exact draws on the language. In two-step mode
/// an epoch of the `TransactionMove` picks a transaction and a subset of it is
/// drawn directly, so nothing is rejected. An epoch that does not coalesce
/// fails the sample instead of being retried.
pub struct Sampler {
    star: StarMove,
    /// present in two-step mode
    base: Option<TransactionMove>,
    schedule: BlockSizePolicy,
    limits: EpochLimits,
    min_length: usize,
    max_rejections: usize,
    rng: StdRng,
    cancel: CancellationToken,
}

impl Sampler {

    pub fn new <D: Database> ( database: &D, config: &SamplerConfig ) -> Result<Sampler> {
	if database.transaction_count() == 0 {
	    return Err( Error::EmptyDatabase );
	}
	config.validate()?;
	let bias = config.bias()?;
	let star = StarMove::new( database, &bias, config.support_tilt )?;
	if config.min_length > star.slot_count() {
	    return Err( Error::Config( format!( "min_length {} exceeds the {} items of the database", config.min_length, star.slot_count() )));
	}
	let base = match config.mode {
	    SamplingMode::Lattice => {
		if star.slot_count() > LATTICE_ITEMS_HINT {
		    warn!( "{} items in lattice mode, most epochs will likely be rejected; consider two-step mode", star.slot_count() );
		}
		None
	    },
	    SamplingMode::TwoStep => Some( TransactionMove::new( database, &bias, config.min_length )? ),
	};

	info!( "sampler over {} transactions and {} items, {:?} mode, schedule {:?}, seed {}",
	       database.transaction_count(), star.slot_count(), config.mode, config.schedule, config.seed );

	Ok( Sampler{
	    star,
	    base,
	    schedule: config.schedule,
	    limits: config.limits(),
	    min_length: config.min_length,
	    max_rejections: config.max_rejections,
	    rng: StdRng::seed_from_u64( config.seed ),
	    cancel: CancellationToken::new(),
	})
    }

    pub fn star( &self ) -> &StarMove {
	&self.star
    }

    pub fn mode( &self ) -> SamplingMode {
	if self.base.is_some() { SamplingMode::TwoStep } else { SamplingMode::Lattice }
    }

    /// Token that cancels every epoch of this sampler
    pub fn cancellation_token( &self ) -> CancellationToken {
	self.cancel.clone()
    }

    pub fn sample( &mut self ) -> Result<Sample> {
	let seed = self.rng.gen::<u64>();
	self.sample_with_seed( seed )
    }

    /// Draws `count` independent samples in parallel. The result only depends on the seed.
    pub fn sample_many( &mut self, count: usize ) -> Result<Vec<Sample>> {
	let seeds: Vec<u64> = (0 .. count).map( |_| self.rng.gen::<u64>() ).collect();
	let span = info_span!( "sample_many", count );
	let _guard = span.enter();
	let sampler: &Sampler = self;
	seeds.par_iter()
	    .map( |seed| sampler.sample_with_seed( *seed ))
	    .collect()
    }

    /// Draws up to `count` samples like `sample_many`, but only for as long as
    /// the budget lasts. Samples still running at the deadline are dropped.
    pub fn sample_within( &mut self, count: usize, budget: Duration ) -> Result<Vec<Sample>> {
	let seeds: Vec<u64> = (0 .. count).map( |_| self.rng.gen::<u64>() ).collect();
	let span = info_span!( "sample_within", count, budget_ms = budget.as_millis() as u64 );
	let _guard = span.enter();
	let token = match Instant::now().checked_add( budget ) {
	    Some( deadline ) => self.cancel.with_deadline( deadline ),
	    None => self.cancel.clone(),
	};
	let sampler: &Sampler = self;
	let results: Vec<Result<Sample>> = seeds.par_iter()
	    .map( |seed| sampler.draw( *seed, &token ))
	    .collect();
	if self.cancel.is_cancelled() {
	    return Err( Error::Cancelled );
	}

	let mut samples = Vec::with_capacity( count );
	let mut expired = 0;
	for result in results {
	    match result {
		Ok( sample ) => samples.push( sample ),
		Err( Error::Cancelled ) => expired += 1,
		Err( e ) => return Err( e ),
	    }
	}
	if expired > 0 {
	    info!( "time budget of {}ms ran out, {} of {count} samples drawn", budget.as_millis(), samples.len() );
	}
	Ok( samples )
    }

    /// Draws the sample derived from the seed
    pub fn sample_with_seed( &self, seed: u64 ) -> Result<Sample> {
	self.draw( seed, &self.cancel )
    }

    fn draw( &self, seed: u64, cancel: &CancellationToken ) -> Result<Sample> {
	match &self.base {
	    Some( base ) => self.draw_two_step( base, seed, cancel ),
	    None => self.draw_lattice( seed, cancel ),
	}
    }

    /// Repeats epochs derived from the seed until one is in the pattern language.
    fn draw_lattice( &self, seed: u64, cancel: &CancellationToken ) -> Result<Sample> {
	let mut seeds = StdRng::seed_from_u64( seed );
	for rejections in 0 ..= self.max_rejections {
	    let coalesced = self.epoch( &self.star, seeds.gen::<u64>(), cancel )?;
	    if self.accepts( &coalesced.state ) {
		let sample = Sample{
		    items: self.star.itemset( &coalesced.state ),
		    support: coalesced.state.support().clone(),
		    window: coalesced.window,
		    attempts: coalesced.attempts,
		    rejections,
		};
		sample.log( "sample", Level::DEBUG );
		return Ok( sample );
	    }
	    coalesced.state.log( "rejected", Level::TRACE );
	}
	Err( Error::Rejected( self.max_rejections + 1 ))
    }

    /// A transaction from the epoch, then a subset of it from the same seed.
    fn draw_two_step( &self, base: &TransactionMove, seed: u64, cancel: &CancellationToken ) -> Result<Sample> {
	let mut rng = StdRng::seed_from_u64( seed );
	let coalesced = self.epoch( base, rng.gen::<u64>(), cancel )?;
	let items = base.draw_subset( coalesced.state, &mut rng )?;
	let state = self.star.state_of( &items )?;
	let sample = Sample{
	    items,
	    support: state.support().clone(),
	    window: coalesced.window,
	    attempts: coalesced.attempts,
	    rejections: 0,
	};
	sample.log( "sample", Level::DEBUG );
	Ok( sample )
    }

    /// Single epoch without rejection: an exact draw of the lattice measure.
    pub fn run_epoch( &self, seed: u64 ) -> Result<Coalesced<ChainState>> {
	self.epoch( &self.star, seed, &self.cancel )
    }

    /// Single epoch over the transactions, only available in two-step mode.
    pub fn run_base_epoch( &self, seed: u64 ) -> Result<Coalesced<Tid>> {
	match &self.base {
	    Some( base ) => self.epoch( base, seed, &self.cancel ),
	    None => Err( Error::Config( "transaction epochs need two-step mode".to_string() )),
	}
    }

    fn epoch <P: Proposal> ( &self, proposal: &P, seed: u64, cancel: &CancellationToken ) -> Result<Coalesced<P::State>> {
	let span = debug_span!( "epoch", seed );
	let _guard = span.enter();
	Epoch::new( proposal, &self.schedule, seed ).run( &self.limits, Some( cancel ))
    }

    /// Membership in the pattern language
    pub fn accepts( &self, state: &ChainState ) -> bool {
	state.is_supported() && state.len() >= self.min_length
    }
}
