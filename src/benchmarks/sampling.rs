use tracing::{info, debug};
use tracing_subscriber;

use clap::Parser;
use rand::prelude::*;
use statrs::distribution::DiscreteUniform;

use std::time::*;

use cftpsampler::*;

/// Times coupling epochs on a synthetic or a FIMI database
#[derive( Parser, Debug )]
#[command( name = "sampling_bench" )]
struct Args {
    /// FIMI file, a synthetic database is generated if missing
    #[arg( long )]
    transactions: Option<String>,

    #[arg( long, default_value_t = 2000 )]
    synthetic_transactions: usize,

    #[arg( long, default_value_t = 40 )]
    synthetic_items: usize,

    #[arg( long, default_value_t = 12 )]
    max_transaction_length: usize,

    /// Epochs per schedule
    #[arg( short = 'n', long, default_value_t = 200 )]
    epochs: usize,

    #[arg( long, default_value_t = 0.0 )]
    tilt: f64,

    #[arg( long, default_value_t = 2012 )]
    seed: u64,

    /// Minimum itemset length for two-step sampling
    #[arg( long, default_value_t = 2 )]
    min_length: usize,
}

fn main() -> Result<(), String> {
    prepare_logging();
    let args = Args::parse();

    let builder = match &args.transactions {
	Some( path ) => io::read_transactions( path, false ).map_err( |e| e.to_string() )?,
	None => synthetic_database( &args )?,
    };
    let database = builder.build().map_err( |e| e.to_string() )?;
    info!( "database with {} transactions over {} items", database.transaction_count(), database.items().len() );

    let schedules = vec!(
	BlockSizePolicy::Doubling{ initial: 2 },
	BlockSizePolicy::Additive{ initial: 8, step: 8 },
	BlockSizePolicy::Geometric{ initial: 2, factor: 4 },
    );
    for schedule in schedules {
	let config = SamplerConfig{
	    schedule,
	    support_tilt: args.tilt,
	    seed: args.seed,
	    ..SamplerConfig::default()
	};
	benchmark_epochs( &database, &config, args.epochs )?;
    }
    if args.tilt == 0.0 {
	let config = SamplerConfig{
	    mode: SamplingMode::TwoStep,
	    min_length: args.min_length,
	    seed: args.seed,
	    ..SamplerConfig::default()
	};
	benchmark_two_step( &database, &config, args.epochs )?;
    }
    Ok( () )
}

/// Transactions of uniform length, each item drawn uniformly
fn synthetic_database( args: &Args ) -> Result<DatabaseBuilder, String> {
    let m = args.synthetic_items.max( 1 );
    let max_length = args.max_transaction_length.clamp( 1, m ) as i64;
    let length_distribution = DiscreteUniform::new( 1, max_length ).map_err( |e| e.to_string() )?;
    let mut gen = StdRng::seed_from_u64( args.seed );

    let universe: Itemvec = (0 .. m).collect();
    let mut builder = DatabaseBuilder::new();
    for _ in 0 .. args.synthetic_transactions {
	let length = length_distribution.sample( &mut gen ) as usize;
	let mut transaction: Itemvec = universe.choose_multiple( &mut gen, length ).copied().collect();
	transaction.sort_unstable();
	let label = if gen.gen_bool( 0.5 ) { Label::Positive } else { Label::Negative };
	builder.add( &transaction, label );
    }
    Ok( builder )
}

fn benchmark_epochs( database: &TransactionDatabase, config: &SamplerConfig, epochs: usize ) -> Result<(), String> {
    let sampler = Sampler::new( database, config ).map_err( |e| e.to_string() )?;
    let mut gen = StdRng::seed_from_u64( config.seed );
    info!( "Start benchmark: {epochs} epochs with {:?}", config.schedule );

    let mut total_time = Duration::ZERO;
    let mut windows: Vec<usize> = Vec::with_capacity( epochs );
    let mut attempts = 0;
    let mut failures = 0;
    let mut supported = 0;
    for _ in 0 .. epochs {
	let start = Instant::now();
	let result = sampler.run_epoch( gen.gen::<u64>() );
	total_time += Instant::now().duration_since( start );
	match result {
	    Ok( coalesced ) => {
		debug!( "window {} after {} attempts", coalesced.window, coalesced.attempts );
		attempts += coalesced.attempts;
		windows.push( coalesced.window );
		if sampler.accepts( &coalesced.state ) {
		    supported += 1;
		}
	    },
	    Err( Error::NotCoalesced{ .. } ) => failures += 1,
	    Err( e ) => return Err( e.to_string() ),
	}
    }

    windows.sort_unstable();
    let coalesced = windows.len();
    if coalesced > 0 {
	let mean = windows.iter().sum::<usize>() as f64 / coalesced as f64;
	info!( "Result: {epochs} epochs took {}ms, {failures} did not coalesce", total_time.as_millis() );
	info!( "window mean {mean:.1}, median {}, max {}, {:.2} attempts per epoch",
	       windows[ coalesced / 2 ], windows[ coalesced - 1 ], attempts as f64 / coalesced as f64 );
	info!( "{supported} of {coalesced} coalesced states are supported" );
    } else {
	info!( "Result: none of {epochs} epochs coalesced" );
    }
    Ok( () )
}

fn benchmark_two_step( database: &TransactionDatabase, config: &SamplerConfig, samples: usize ) -> Result<(), String> {
    let mut sampler = Sampler::new( database, config ).map_err( |e| e.to_string() )?;
    info!( "Start benchmark: {samples} two-step samples with min length {}", config.min_length );

    let start = Instant::now();
    let drawn = sampler.sample_many( samples ).map_err( |e| e.to_string() )?;
    let elapsed = Instant::now().duration_since( start );

    let windows: usize = drawn.iter().map( |sample| sample.window ).sum();
    let lengths: usize = drawn.iter().map( |sample| sample.items.len() ).sum();
    let count = drawn.len().max( 1 ) as f64;
    info!( "Result: {} samples took {}ms, window mean {:.1}, length mean {:.2}",
	   drawn.len(), elapsed.as_millis(), windows as f64 / count, lengths as f64 / count );
    Ok( () )
}

fn prepare_logging() {
    let tracer = tracing_subscriber::fmt::fmt()
	.with_max_level( tracing_subscriber::filter::LevelFilter::INFO )
	.finish();
    let _ = tracing::subscriber::set_global_default( tracer );
}
