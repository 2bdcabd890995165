//! Checks of sampler output against the exact target distribution.
//!
//! The exact distributions are computed by enumerating the item lattice, so
//! they are only available for small databases.

use rustc_hash::FxHashMap;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::*;
use crate::error::{Error, Result};

/// Largest number of items that is enumerated
pub const MAX_ENUMERATED_ITEMS: usize = 20;

/// Normalized target probabilities of the itemsets in the pattern language.
#[derive( Debug, Clone )]
pub struct ExactDistribution {
    probabilities: FxHashMap<Itemvec, f64>,
}

#[derive( Debug, Clone, Default )]
pub struct EmpiricalDistribution {
    counts: FxHashMap<Itemvec, usize>,
    total: usize,
}

/// Pearson goodness of fit of observed counts to an exact distribution.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct ChiSquareTest {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    /// probability of a statistic at least as large under the exact distribution
    pub p_value: f64,
}

impl ExactDistribution {

    /// Weighs every supported itemset with at least `min_length` items by the stationary measure of the move.
    pub fn enumerate( star: &StarMove, min_length: usize ) -> Result<ExactDistribution> {
	ExactDistribution::enumerate_with( star, min_length, |state| star.log_weight( state ))
    }

    /// Target of two-step sampling: the bias product times the weighted size of the support.
    pub fn enumerate_two_step <D: Database> ( star: &StarMove, database: &D, min_length: usize ) -> Result<ExactDistribution> {
	ExactDistribution::enumerate_with( star, min_length, |state| {
	    Ok( star.log_bias( state )? + database.weighted_size( state.support() )?.ln() )
	})
    }

    fn enumerate_with <F> ( star: &StarMove, min_length: usize, log_weight_of: F ) -> Result<ExactDistribution> where F: Fn( &ChainState ) -> Result<f64> {
	let items = star.items();
	let m = items.len();
	if m > MAX_ENUMERATED_ITEMS {
	    return Err( Error::Config( format!( "cannot enumerate {m} items, at most {MAX_ENUMERATED_ITEMS}" )));
	}

	let mut log_weights: Vec<(Itemvec, f64)> = Vec::new();
	for mask in 0u64 .. ( 1u64 << m ) {
	    let itemset: Itemvec = (0 .. m)
		.filter( |bit| ( mask >> bit ) & 1 == 1 )
		.map( |bit| items[ bit ] )
		.collect();
	    if itemset.len() < min_length {
		continue;
	    }
	    let state = star.state_of( &itemset )?;
	    if !state.is_supported() {
		continue;
	    }
	    let log_weight = log_weight_of( &state )?;
	    log_weights.push( (itemset, log_weight) );
	}
	if log_weights.is_empty() {
	    return Err( Error::Config( format!( "no supported itemset has at least {min_length} items" )));
	}

	// log-sum-exp
	let max = log_weights.iter().map( |(_, w)| *w ).fold( f64::NEG_INFINITY, f64::max );
	let total: f64 = log_weights.iter().map( |(_, w)| ( w - max ).exp() ).sum();
	let probabilities = log_weights.into_iter()
	    .map( |(itemset, w)| (itemset, ( w - max ).exp() / total ))
	    .collect();
	Ok( ExactDistribution{ probabilities } )
    }

    pub fn len( &self ) -> usize {
	self.probabilities.len()
    }

    pub fn is_empty( &self ) -> bool {
	self.probabilities.is_empty()
    }

    /// Probability of a sorted itemset
    pub fn probability( &self, itemset: &[Item] ) -> f64 {
	self.probabilities.get( itemset ).copied().unwrap_or( 0.0 )
    }

    /// Probability that a sample contains the item
    pub fn marginal( &self, item: Item ) -> f64 {
	self.probabilities.iter()
	    .filter( |(itemset, _)| itemset.contains( &item ))
	    .map( |(_, p)| *p )
	    .sum()
    }

    pub fn iter( &self ) -> impl Iterator<Item = (&Itemvec, f64)> {
	self.probabilities.iter().map( |(itemset, p)| (itemset, *p) )
    }
}

impl EmpiricalDistribution {

    pub fn from_samples( samples: &[Sample] ) -> EmpiricalDistribution {
	EmpiricalDistribution::from_itemsets( samples.iter().map( |sample| sample.items.clone() ))
    }

    pub fn from_itemsets <I> ( itemsets: I ) -> EmpiricalDistribution where I: IntoIterator<Item = Itemvec> {
	let mut distribution = EmpiricalDistribution::default();
	for mut itemset in itemsets {
	    itemset.sort_unstable();
	    *distribution.counts.entry( itemset ).or_insert( 0 ) += 1;
	    distribution.total += 1;
	}
	distribution
    }

    pub fn total( &self ) -> usize {
	self.total
    }

    pub fn count( &self, itemset: &[Item] ) -> usize {
	self.counts.get( itemset ).copied().unwrap_or( 0 )
    }

    pub fn frequency( &self, itemset: &[Item] ) -> f64 {
	if self.total == 0 {
	    return 0.0;
	}
	self.count( itemset ) as f64 / self.total as f64
    }

    pub fn marginal( &self, item: Item ) -> f64 {
	if self.total == 0 {
	    return 0.0;
	}
	let containing: usize = self.counts.iter()
	    .filter( |(itemset, _)| itemset.contains( &item ))
	    .map( |(_, count)| *count )
	    .sum();
	containing as f64 / self.total as f64
    }

    /// Pearson's test over the itemsets of the exact distribution.
    /// Observing an itemset the exact distribution excludes gives p = 0.
    pub fn chi_square( &self, expected: &ExactDistribution ) -> Result<ChiSquareTest> {
	if self.total == 0 {
	    return Err( Error::Config( "chi-square test without observations".to_string() ));
	}
	let degrees_of_freedom = expected.len().saturating_sub( 1 );
	let impossible = self.counts.keys().any( |itemset| expected.probability( itemset ) == 0.0 );
	if impossible {
	    return Ok( ChiSquareTest{ statistic: f64::INFINITY, degrees_of_freedom, p_value: 0.0 } );
	}

	let n = self.total as f64;
	let statistic: f64 = expected.iter()
	    .map( |(itemset, p)| {
		let expected_count = n * p;
		let deviation = self.count( itemset ) as f64 - expected_count;
		deviation * deviation / expected_count
	    })
	    .sum();

	if degrees_of_freedom == 0 {
	    return Ok( ChiSquareTest{ statistic, degrees_of_freedom, p_value: 1.0 } );
	}
	let distribution = ChiSquared::new( degrees_of_freedom as f64 ).map_err( |e| Error::Config( e.to_string() ))?;
	let p_value = 1.0 - distribution.cdf( statistic );
	debug!( "chi-square {statistic:.3} with {degrees_of_freedom} degrees of freedom, p = {p_value:.4}" );
	Ok( ChiSquareTest{ statistic, degrees_of_freedom, p_value } )
    }
}
