use std::cmp::Ordering;

use rand::Rng;

use crate::*;
use crate::error::{Error, Result};

/// Independence Metropolis move over the transactions of a database, the
/// first step of two-step sampling.
///
/// Transaction `t` has the mass `w(t) * Z(t)`, where `Z(t)` sums the bias
/// product over the subsets of `t` with at least `min_length` items. A draw
/// proposes the transaction `slot` and accepts it iff `ln u < m(slot) - m(t)`
/// for log masses `m`. Transactions are ordered by mass with ties broken by
/// tid. A chain in a larger state accepts only proposals that a chain in a
/// smaller state accepts as well, and a rejected proposal lies strictly below
/// the state that rejected it, so the move is monotone in this order.
///
/// Drawing a transaction from the stationary measure and then a subset of it
/// with `draw_subset` samples `X` with probability proportional to
/// `prod_{i in X} bias(i) * W(supp(X))` over the itemsets with at least
/// `min_length` items.
#[derive( Debug, Clone )]
pub struct TransactionMove {
    items: Vec<Itemvec>,
    log_bias: Vec<Vec<f64>>,
    /// `ln( w(t) * Z(t) )`, negative infinity for transactions too short to qualify
    log_mass: Vec<f64>,
    min_length: usize,
    top: Tid,
    bottom: Tid,
}

impl TransactionMove {

    pub fn new <D: Database> ( database: &D, bias: &Bias, min_length: usize ) -> Result<TransactionMove> {
	let n = database.transaction_count();
	if n == 0 {
	    return Err( Error::EmptyDatabase );
	}
	let mut items = Vec::with_capacity( n );
	let mut log_bias = Vec::with_capacity( n );
	let mut log_mass = Vec::with_capacity( n );
	for tid in 0 .. n {
	    let transaction = database.transaction_items( tid )?;
	    let biases: Vec<f64> = transaction.iter().map( |item| bias.log_bias_of( *item )).collect();
	    let subsets = suffix_table( &biases, min_length );
	    log_mass.push( database.transaction_weight( tid )?.ln() + subsets[ 0 ][ min_length ] );
	    items.push( transaction );
	    log_bias.push( biases );
	}
	if log_mass.iter().all( |mass| *mass == f64::NEG_INFINITY ) {
	    return Err( Error::Config( format!( "no transaction has {min_length} items" )));
	}

	let mut top = 0;
	let mut bottom = 0;
	for tid in 1 .. n {
	    if rank( &log_mass, top, tid ) == Ordering::Less {
		top = tid;
	    }
	    if rank( &log_mass, tid, bottom ) == Ordering::Less {
		bottom = tid;
	    }
	}
	tracing::debug!( "transaction move over {n} transactions, min length {min_length}, top {top}, bottom {bottom}" );

	Ok( TransactionMove{
	    items,
	    log_bias,
	    log_mass,
	    min_length,
	    top,
	    bottom,
	})
    }

    pub fn min_length( &self ) -> usize {
	self.min_length
    }

    pub fn log_mass( &self, tid: Tid ) -> Result<f64> {
	self.log_mass.get( tid ).copied().ok_or( Error::IndexOutOfRange{ index: tid, size: self.log_mass.len() } )
    }

    /// Whether `left` is below or equal to `right` in the order of the chain
    pub fn precedes( &self, left: Tid, right: Tid ) -> bool {
	rank( &self.log_mass, left, right ) != Ordering::Greater
    }

    /// Draws a subset of transaction `tid` with at least `min_length` items,
    /// each subset with probability proportional to its bias product.
    pub fn draw_subset <R: Rng + ?Sized> ( &self, tid: Tid, rng: &mut R ) -> Result<Itemvec> {
	let (items, biases) = match (self.items.get( tid ), self.log_bias.get( tid )) {
	    (Some( items ), Some( biases )) => (items, biases),
	    _ => return Err( Error::IndexOutOfRange{ index: tid, size: self.items.len() } ),
	};
	let subsets = suffix_table( biases, self.min_length );
	if subsets[ 0 ][ self.min_length ] == f64::NEG_INFINITY {
	    return Err( Error::Config( format!( "transaction {tid} has fewer than {} items", self.min_length )));
	}

	let mut subset = Itemvec::new();
	let mut need = self.min_length;
	for (from, item) in items.iter().enumerate() {
	    let total = subsets[ from ][ need ];
	    let take = biases[ from ] + subsets[ from + 1 ][ need.saturating_sub( 1 ) ];
	    if rng.gen::<f64>() < f64::exp( take - total ) {
		subset.push( *item );
		need = need.saturating_sub( 1 );
	    }
	}
	Ok( subset )
    }
}

impl Proposal for TransactionMove {

    type State = Tid;

    fn slot_count( &self ) -> usize {
	self.log_mass.len()
    }

    fn top( &self ) -> Result<Tid> {
	Ok( self.top )
    }

    fn bottom( &self ) -> Tid {
	self.bottom
    }

    fn apply( &self, state: &mut Tid, draw: &Draw ) -> Result<()> {
	let proposed = self.log_mass( draw.slot )?;
	let current = self.log_mass( *state )?;
	if proposed == f64::NEG_INFINITY {
	    return Ok( () );
	}
	// one rounding step only, equal masses give exactly zero
	if draw.u.ln() < proposed - current {
	    *state = draw.slot;
	}
	Ok( () )
    }
}

/// Chain order: by log mass, then by tid
fn rank( log_mass: &[f64], left: Tid, right: Tid ) -> Ordering {
    log_mass[ left ].total_cmp( &log_mass[ right ] ).then( left.cmp( &right ))
}

/// `table[ from ][ need ]` is the log of the summed bias products over the
/// subsets of `log_bias[ from .. ]` with at least `need` elements.
fn suffix_table( log_bias: &[f64], min_length: usize ) -> Vec<Vec<f64>> {
    let len = log_bias.len();
    let mut table = vec!( vec!( f64::NEG_INFINITY; min_length + 1 ); len + 1 );
    table[ len ][ 0 ] = 0.0;
    for from in (0 .. len).rev() {
	for need in 0 ..= min_length {
	    let skip = table[ from + 1 ][ need ];
	    let take = log_bias[ from ] + table[ from + 1 ][ need.saturating_sub( 1 ) ];
	    table[ from ][ need ] = log_add( skip, take );
	}
    }
    table
}

fn log_add( left: f64, right: f64 ) -> f64 {
    let (high, low) = if left >= right { (left, right) } else { (right, left) };
    if high == f64::NEG_INFINITY {
	return high;
    }
    high + ( low - high ).exp().ln_1p()
}

#[cfg(test)]
mod test {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rustc_hash::FxHashMap;
    use crate::data::{DatabaseBuilder, Label};

    macro_rules! assert_approx {
	($real:expr, $expected:expr, $delta:expr) => {
	    if $real < $expected - $delta || $real > $expected + $delta {
		panic!( "Violate {:.4} == {:.4} (+-{:.4})", $real, $expected, $delta );
	    }
	}
    }

    fn database() -> TransactionDatabase {
	let mut builder = DatabaseBuilder::new();
	builder.add( &[ 1, 2, 3 ], Label::Positive );
	builder.add( &[ 2 ], Label::Positive );
	builder.add( &[ 1, 3 ], Label::Negative );
	builder.add( &[] as &[Item], Label::Positive );
	builder.set_weight( 2, 3.0 );
	builder.build().unwrap()
    }

    #[test]
    fn test_suffix_table_counts_subsets() {
	// unit biases: the table counts subsets
	let table = suffix_table( &[ 0.0; 4 ], 2 );
	assert_approx!( table[ 0 ][ 0 ].exp(), 16.0, 1e-9 );
	assert_approx!( table[ 0 ][ 1 ].exp(), 15.0, 1e-9 );
	assert_approx!( table[ 0 ][ 2 ].exp(), 11.0, 1e-9 );
	assert_eq!( table[ 3 ][ 2 ], f64::NEG_INFINITY );
	assert_approx!( log_add( 2f64.ln(), 3f64.ln() ).exp(), 5.0, 1e-12 );
	assert_eq!( log_add( f64::NEG_INFINITY, f64::NEG_INFINITY ), f64::NEG_INFINITY );
    }

    #[test]
    fn test_masses_and_extremal_states() {
	let database = database();
	let bias = Bias::uniform( 1.0 ).unwrap();
	let moves = TransactionMove::new( &database, &bias, 0 ).unwrap();
	assert_eq!( moves.slot_count(), 4 );
	// 8 subsets, 2 subsets, 3 * 4 subsets, 1 subset
	assert_approx!( moves.log_mass( 0 ).unwrap().exp(), 8.0, 1e-9 );
	assert_approx!( moves.log_mass( 1 ).unwrap().exp(), 2.0, 1e-9 );
	assert_approx!( moves.log_mass( 2 ).unwrap().exp(), 12.0, 1e-9 );
	assert_approx!( moves.log_mass( 3 ).unwrap().exp(), 1.0, 1e-9 );
	assert_eq!( moves.top().unwrap(), 2 );
	assert_eq!( moves.bottom(), 3 );

	let moves = TransactionMove::new( &database, &bias, 2 ).unwrap();
	assert_approx!( moves.log_mass( 0 ).unwrap().exp(), 4.0, 1e-9 );
	assert_eq!( moves.log_mass( 1 ).unwrap(), f64::NEG_INFINITY );
	assert_eq!( moves.top().unwrap(), 0 );
	// ties among the empty masses are broken by tid
	assert_eq!( moves.bottom(), 1 );

	assert!( matches!( TransactionMove::new( &database, &bias, 4 ), Err( Error::Config( _ ))));
	let empty = DatabaseBuilder::new().build().unwrap();
	assert!( matches!( TransactionMove::new( &empty, &bias, 0 ), Err( Error::EmptyDatabase )));
    }

    #[test]
    fn test_acceptance() {
	let database = database();
	let moves = TransactionMove::new( &database, &Bias::uniform( 1.0 ).unwrap(), 0 ).unwrap();
	// from mass 8 to mass 2: accept iff u < 1/4
	assert_eq!( moves.propose( &0, &Draw{ slot: 1, u: 0.24 } ).unwrap(), 1 );
	assert_eq!( moves.propose( &0, &Draw{ slot: 1, u: 0.26 } ).unwrap(), 0 );
	// to a heavier transaction always
	assert_eq!( moves.propose( &0, &Draw{ slot: 2, u: 0.999 } ).unwrap(), 2 );
	assert!( moves.propose( &0, &Draw{ slot: 4, u: 0.5 } ).is_err() );

	let moves = TransactionMove::new( &database, &Bias::uniform( 1.0 ).unwrap(), 1 ).unwrap();
	// the empty transaction has no qualifying subset and is never entered
	assert_eq!( moves.propose( &1, &Draw{ slot: 3, u: 0.0 } ).unwrap(), 1 );
    }

    #[test]
    fn test_subsets_respect_min_length() {
	let database = database();
	let bias = Bias::with_overrides( 1.0, [ (3, 5.0) ] ).unwrap();
	let moves = TransactionMove::new( &database, &bias, 2 ).unwrap();
	let mut rng = StdRng::seed_from_u64( 4 );
	for _ in 0 .. 200 {
	    let subset = moves.draw_subset( 0, &mut rng ).unwrap();
	    assert!( subset.len() >= 2 );
	    assert!( subset.windows( 2 ).all( |pair| pair[ 0 ] < pair[ 1 ] ));
	    assert!( subset.iter().all( |item| [ 1, 2, 3 ].contains( item )));
	}
	assert!( matches!( moves.draw_subset( 1, &mut rng ), Err( Error::Config( _ ))));
	assert!( moves.draw_subset( 9, &mut rng ).is_err() );
    }

    #[test]
    /// Subsets of {1, 2, 3} with at least one item, item 3 weighted 4
    fn test_subset_frequencies() {
	let database = database();
	let bias = Bias::with_overrides( 1.0, [ (3, 4.0) ] ).unwrap();
	let moves = TransactionMove::new( &database, &bias, 1 ).unwrap();
	let mut rng = StdRng::seed_from_u64( 2012 );
	let draws = 20_000;
	let mut counts: FxHashMap<Itemvec, usize> = FxHashMap::default();
	for _ in 0 .. draws {
	    *counts.entry( moves.draw_subset( 0, &mut rng ).unwrap() ).or_insert( 0 ) += 1;
	}
	// Z = (1 + 1) * (1 + 1) * (1 + 4) - 1 = 19
	assert_eq!( counts.len(), 7 );
	let frequency = |itemset: &[Item]| counts.get( itemset ).copied().unwrap_or( 0 ) as f64 / draws as f64;
	assert_approx!( frequency( &[ 1 ] ), 1.0 / 19.0, 0.01 );
	assert_approx!( frequency( &[ 3 ] ), 4.0 / 19.0, 0.015 );
	assert_approx!( frequency( &[ 1, 2, 3 ] ), 4.0 / 19.0, 0.015 );
    }

    mod monotone {
	use proptest::prelude::*;
	use super::super::*;
	use crate::data::{DatabaseBuilder, Label};

	proptest! {
	    #[test]
	    fn ordered_states_stay_ordered(
		transactions in proptest::collection::vec( (proptest::collection::vec( 0usize .. 6, 0 .. 5 ), 0.1f64 .. 4.0), 1 .. 10 ),
		draws in proptest::collection::vec( (0usize .. 64, 0.0f64 .. 1.0), 1 .. 40 ),
		min_length in 0usize .. 3,
		start in (0usize .. 64, 0usize .. 64),
	    ) {
		let mut builder = DatabaseBuilder::new();
		for (items, weight) in &transactions {
		    let tid = builder.add( items, Label::Positive );
		    builder.set_weight( tid, *weight );
		}
		let database = builder.build().unwrap();
		let moves = match TransactionMove::new( &database, &Bias::uniform( 1.5 ).unwrap(), min_length ) {
		    Ok( moves ) => moves,
		    Err( Error::Config( _ )) => return Ok( () ),
		    Err( e ) => panic!( "unexpected {e}" ),
		};
		let n = moves.slot_count();
		let (mut lower, mut upper) = (start.0 % n, start.1 % n);
		if !moves.precedes( lower, upper ) {
		    std::mem::swap( &mut lower, &mut upper );
		}
		let mut top = moves.top().unwrap();
		let mut bottom = moves.bottom();
		for (slot, u) in draws {
		    let draw = Draw{ slot: slot % n, u };
		    for state in [ &mut lower, &mut upper, &mut top, &mut bottom ] {
			moves.apply( state, &draw ).unwrap();
		    }
		    prop_assert!( moves.precedes( lower, upper ));
		    prop_assert!( moves.precedes( bottom, lower ));
		    prop_assert!( moves.precedes( upper, top ));
		}
	    }
	}
    }
}
