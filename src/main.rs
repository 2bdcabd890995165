use std::io::Write;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use cftpsampler::*;

/// Draws exact samples of supported itemsets from a transaction database
#[derive( Parser, Debug )]
#[command( name = "sampler" )]
struct Args {
    /// Transactions in FIMI format
    transactions: String,

    /// First token of every line is a class label
    #[arg( long )]
    labeled: bool,

    /// Transaction weights, one `tid=weight` per line
    #[arg( long )]
    weights: Option<String>,

    /// Sampler configuration in json, flags override its values
    #[arg( long )]
    config: Option<String>,

    /// Number of samples
    #[arg( short = 'n', long, default_value_t = 10 )]
    count: usize,

    #[arg( long )]
    seed: Option<u64>,

    /// Global item bias
    #[arg( long )]
    bias: Option<f64>,

    /// Per-item bias override `item=weight`, may be repeated
    #[arg( long = "item-bias" )]
    item_bias: Vec<String>,

    /// Support tilt, rewards itemsets with positive support
    #[arg( long )]
    tilt: Option<f64>,

    #[arg( long )]
    min_length: Option<usize>,

    #[arg( long )]
    max_attempts: Option<usize>,

    /// Pick a transaction first and then one of its subsets, for databases with many items
    #[arg( long )]
    two_step: bool,

    /// Seconds to sample for, the samples drawn until then are printed
    #[arg( long )]
    time_limit: Option<f64>,

    /// Print the supporting transactions instead of the items
    #[arg( long )]
    supports: bool,

    /// Also write the samples as json to this file
    #[arg( long )]
    json: Option<String>,

    #[arg( short, long )]
    verbose: bool,
}

fn main() -> Result<(), String> {
    let args = Args::parse();
    prepare_logging( args.verbose );

    let config = configure( &args ).map_err( |e| e.to_string() )?;

    let mut builder = io::read_transactions( &args.transactions, args.labeled ).map_err( |e| e.to_string() )?;
    if let Some( path ) = &args.weights {
	builder.set_weights( io::read_weights( path ).map_err( |e| e.to_string() )? );
    }
    let database = builder.build().map_err( |e| e.to_string() )?;

    let mut sampler = Sampler::new( &database, &config ).map_err( |e| e.to_string() )?;
    let samples = match args.time_limit {
	Some( seconds ) => {
	    let budget = Duration::try_from_secs_f64( seconds ).map_err( |e| format!( "time limit {seconds}: {e}" ))?;
	    sampler.sample_within( args.count, budget ).map_err( |e| e.to_string() )?
	},
	None => sampler.sample_many( args.count ).map_err( |e| e.to_string() )?,
    };
    let rejections: usize = samples.iter().map( |sample| sample.rejections ).sum();
    info!( "drew {} samples, {rejections} epochs rejected", samples.len() );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    io::write_samples_fimi( &samples, args.supports, &mut out ).map_err( |e| e.to_string() )?;
    out.flush().map_err( |e| e.to_string() )?;

    if let Some( path ) = &args.json {
	io::write_samples_json( &samples, path ).map_err( |e| e.to_string() )?;
    }
    Ok( () )
}

fn configure( args: &Args ) -> Result<SamplerConfig, Error> {
    let mut config = match &args.config {
	Some( path ) => SamplerConfig::from_json_file( path )?,
	None => SamplerConfig::default(),
    };
    if let Some( seed ) = args.seed {
	config.seed = seed;
    }
    if let Some( bias ) = args.bias {
	config.global_bias = bias;
    }
    config.item_bias.extend( io::parse_item_weights( args.item_bias.iter().map( String::as_str ))? );
    if let Some( tilt ) = args.tilt {
	config.support_tilt = tilt;
    }
    if let Some( min_length ) = args.min_length {
	config.min_length = min_length;
    }
    if let Some( max_attempts ) = args.max_attempts {
	config.max_attempts = max_attempts;
    }
    if args.two_step {
	config.mode = SamplingMode::TwoStep;
    }
    Ok( config )
}

fn prepare_logging( verbose: bool ) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let tracer = tracing_subscriber::fmt::fmt()
	.with_max_level( level )
	.with_writer( std::io::stderr )
	.finish();
    // a second subscriber is only refused, logging keeps working
    let _ = tracing::subscriber::set_global_default( tracer );
}
