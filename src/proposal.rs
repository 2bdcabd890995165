use std::fmt;

use rand::Rng;

use crate::*;
use crate::error::{Error, Result};

mod two_step;

pub use two_step::TransactionMove;

/// One unit of randomness consumed by a single chain step.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct Draw {
    /// drawn position, an item slot or a transaction
    pub slot: usize,
    /// uniform in [0, 1)
    pub u: f64,
}

impl Draw {
    pub fn random<R: Rng + ?Sized>( rng: &mut R, slot_count: usize ) -> Draw {
	Draw{
	    slot: rng.gen_range( 0 .. slot_count ),
	    u: rng.gen::<f64>(),
	}
    }
}

/// State of the lattice chain: the slots of the chosen items together with the
/// transactions supporting them.
///
/// Slot `k` stands for the `k`-th item of the move's sorted item list. States
/// are ordered by inclusion of their slots. The support is a function of the
/// slots, so equality of slots is equality of states.
#[derive( Debug, Clone, PartialEq, Eq, Hash )]
pub struct ChainState {
    slots: TidList,
    support: TidList,
}

impl ChainState {

    pub fn slots( &self ) -> &TidList {
	&self.slots
    }

    pub fn support( &self ) -> &TidList {
	&self.support
    }

    pub fn len( &self ) -> usize {
	self.slots.cardinality()
    }

    pub fn is_empty( &self ) -> bool {
	self.slots.is_empty()
    }

    /// Whether at least one transaction contains the itemset
    pub fn is_supported( &self ) -> bool {
	!self.support.is_empty()
    }

    pub fn is_subset( &self, other: &ChainState ) -> Result<bool> {
	self.slots.is_subset( &other.slots )
    }
}

impl Loggable for ChainState {
    fn log( &self, message: &str, level: Level ) {
	log_at!( level, "{message}: slots {{{}}} supported by {} transactions", self.slots, self.support.cardinality() );
    }
}

/// Move of a Markov chain on a partially ordered state space.
///
/// Implementations must be deterministic in `(state, draw)` and monotone: for
/// states `A <= B` and any draw, `apply` keeps `A' <= B'`. Coalescence of the
/// chains started in `top` and `bottom` then implies coalescence of all chains.
pub trait Proposal: Sync {

    type State: Clone + PartialEq + fmt::Debug + Send;

    /// Number of distinct draw slots
    fn slot_count( &self ) -> usize;

    /// Greatest state
    fn top( &self ) -> Result<Self::State>;

    /// Least state
    fn bottom( &self ) -> Self::State;

    /// Advances the state in place by one step.
    fn apply( &self, state: &mut Self::State, draw: &Draw ) -> Result<()>;

    /// Pure variant of `apply`.
    fn propose( &self, state: &Self::State, draw: &Draw ) -> Result<Self::State> {
	let mut next = state.clone();
	self.apply( &mut next, draw )?;
	Ok( next )
    }
}

/// Single-site heat-bath move over the items of a database.
///
/// The stationary measure is
/// `w(X) = prod_{i in X} bias(i) * exp( tilt * W+(supp(X)) )`
/// where `W+` is the weighted size of the positive transactions. A draw picks
/// item `i` and `u`. With `Y = X \ {i}` the item is kept or added iff `u < p`:
///
/// `p = r / (1 + r)`, `r = bias(i) * exp( -tilt * W+(supp(Y) \ supp(i)) )`.
///
/// An absent item is therefore added iff `u < p`, a present one removed iff
/// `u >= p`. `W+(supp(Y) \ supp(i))` only shrinks as `Y` grows, so `p` is
/// monotone in `Y` and the move is monotone. A negative tilt would reverse
/// this and is refused.
#[derive( Debug, Clone )]
pub struct StarMove {
    /// sorted, the position is the slot
    items: Itemvec,
    supports: Vec<TidList>,
    log_bias: Vec<f64>,
    /// transaction weight for positive transactions, zero for negative ones
    positive_weights: Vec<f64>,
    tilt: f64,
    transaction_count: usize,
}

impl StarMove {

    pub fn new <D: Database> ( database: &D, bias: &Bias, tilt: f64 ) -> Result<StarMove> {
	if !tilt.is_finite() || tilt < 0.0 {
	    return Err( Error::InvalidTilt( tilt ));
	}
	let items: Itemvec = database.items().to_vec();
	let supports: Vec<TidList> = items.iter().map( |item| database.item_support( *item )).collect();
	let log_bias: Vec<f64> = items.iter().map( |item| bias.log_bias_of( *item )).collect();

	let n = database.transaction_count();
	let mut positive_weights = vec!( 0.0; n );
	for tid in database.positive().iter() {
	    positive_weights[ tid ] = database.transaction_weight( tid )?;
	}

	tracing::debug!( "star move over {} items, tilt {tilt}, uniform bias {}", items.len(), bias.is_uniform() );

	Ok( StarMove{
	    items,
	    supports,
	    log_bias,
	    positive_weights,
	    tilt,
	    transaction_count: n,
	})
    }

    pub fn items( &self ) -> &[Item] {
	&self.items
    }

    pub fn tilt( &self ) -> f64 {
	self.tilt
    }

    /// Builds the state for an itemset of active items
    pub fn state_of <'a, I> ( &self, itemset: I ) -> Result<ChainState> where I: IntoIterator<Item = &'a Item> {
	let mut state = self.bottom();
	for item in itemset {
	    let slot = self.slot_of( *item )?;
	    state.slots.insert( slot )?;
	    state.support.retain_all( &self.supports[ slot ] )?;
	}
	Ok( state )
    }

    /// Sorted items of a state
    pub fn itemset( &self, state: &ChainState ) -> Itemvec {
	state.slots.iter().filter_map( |slot| self.items.get( slot ).copied() ).collect()
    }

    pub fn contains( &self, state: &ChainState, item: Item ) -> bool {
	self.slot_of( item ).map_or( false, |slot| state.slots.contains( slot ))
    }

    /// Summed log bias of the items of a state
    pub fn log_bias( &self, state: &ChainState ) -> Result<f64> {
	let mut log_bias = 0.0;
	for slot in state.slots.iter() {
	    log_bias += *self.log_bias.get( slot ).ok_or( Error::IndexOutOfRange{ index: slot, size: self.items.len() } )?;
	}
	Ok( log_bias )
    }

    /// Unnormalized log weight of a state under the stationary measure
    pub fn log_weight( &self, state: &ChainState ) -> Result<f64> {
	let mut log_weight = self.log_bias( state )?;
	if self.tilt > 0.0 {
	    let mass: f64 = state.support.iter().map( |tid| self.positive_weights[ tid ] ).sum();
	    log_weight += self.tilt * mass;
	}
	Ok( log_weight )
    }

    /// Probability that the drawn item belongs to the next state.
    /// `base` is the support of the state without the item.
    fn inclusion_probability( &self, slot: usize, base: Option<&TidList> ) -> f64 {
	let mut log_ratio = self.log_bias[ slot ];
	if let Some( base ) = base {
	    // summed in tid order: a subset never gets a larger sum, also after rounding
	    let lost_mass: f64 = base.iter()
		.filter( |tid| !self.supports[ slot ].contains( *tid ))
		.map( |tid| self.positive_weights[ tid ] )
		.sum();
	    log_ratio -= self.tilt * lost_mass;
	}
	1.0 / ( 1.0 + f64::exp( -log_ratio ))
    }

    /// Support of the state's itemset without the item in `slot`
    fn support_without( &self, state: &ChainState, slot: usize ) -> Result<TidList> {
	let mut support = TidList::full( self.transaction_count );
	for other in state.slots.iter().filter( |other| *other != slot ) {
	    support.retain_all( &self.supports[ other ] )?;
	}
	Ok( support )
    }

    fn slot_of( &self, item: Item ) -> Result<usize> {
	self.items.binary_search( &item ).map_err( |_| Error::UnknownItem( item ))
    }
}

impl Proposal for StarMove {

    type State = ChainState;

    fn slot_count( &self ) -> usize {
	self.items.len()
    }

    fn top( &self ) -> Result<ChainState> {
	let mut support = TidList::full( self.transaction_count );
	for item_support in &self.supports {
	    support.retain_all( item_support )?;
	}
	Ok( ChainState{
	    slots: TidList::full( self.items.len() ),
	    support,
	})
    }

    fn bottom( &self ) -> ChainState {
	ChainState{
	    slots: TidList::empty( self.items.len() ),
	    support: TidList::full( self.transaction_count ),
	}
    }

    fn apply( &self, state: &mut ChainState, draw: &Draw ) -> Result<()> {
	let slot = draw.slot;
	if slot >= self.items.len() {
	    return Err( Error::IndexOutOfRange{ index: slot, size: self.items.len() } );
	}
	let present = state.slots.contains( slot );

	let mut base: Option<TidList> = None;
	let p = if self.tilt > 0.0 {
	    let without = if present { self.support_without( state, slot )? } else { state.support.clone() };
	    let p = self.inclusion_probability( slot, Some( &without ));
	    base = Some( without );
	    p
	} else {
	    self.inclusion_probability( slot, None )
	};

	match (present, draw.u < p) {
	    (false, true) => {
		state.support.retain_all( &self.supports[ slot ] )?;
		state.slots.insert( slot )?;
	    },
	    (true, false) => {
		state.support = match base {
		    Some( without ) => without,
		    None => self.support_without( state, slot )?,
		};
		state.slots.remove( slot )?;
	    },
	    // rejected add or rejected removal
	    _ => {},
	}
	Ok( () )
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::data::{DatabaseBuilder, Label};

    fn small_database() -> TransactionDatabase {
	let mut builder = DatabaseBuilder::new();
	builder.add( &[ 1, 2 ], Label::Positive );
	builder.add( &[ 2, 3 ], Label::Positive );
	builder.add( &[ 1, 3 ], Label::Negative );
	builder.add( &[ 1 ], Label::Positive );
	builder.add( &[ 2 ], Label::Negative );
	builder.build().unwrap()
    }

    #[test]
    fn test_extremal_states() {
	let database = small_database();
	let star = StarMove::new( &database, &Bias::uniform( 1.0 ).unwrap(), 0.0 ).unwrap();
	assert_eq!( star.slot_count(), 3 );
	let top = star.top().unwrap();
	let bottom = star.bottom();
	assert_eq!( star.itemset( &top ), vec!( 1, 2, 3 ));
	assert!( star.contains( &top, 3 ));
	assert!( !star.contains( &top, 7 ));
	assert!( !top.is_supported() );
	assert!( bottom.is_empty() );
	assert_eq!( bottom.support().cardinality(), 5 );
	assert!( bottom.is_subset( &top ).unwrap() );
    }

    #[test]
    /// Untilted uniform bias includes an item iff u < 1/2
    fn test_untilted_threshold() {
	let database = small_database();
	let star = StarMove::new( &database, &Bias::uniform( 1.0 ).unwrap(), 0.0 ).unwrap();
	let bottom = star.bottom();
	let added = star.propose( &bottom, &Draw{ slot: 0, u: 0.49 } ).unwrap();
	assert_eq!( star.itemset( &added ), vec!( 1 ));
	assert_eq!( added.support().to_sorted_vec(), vec!( 0, 2, 3 ));
	let rejected = star.propose( &bottom, &Draw{ slot: 0, u: 0.5 } ).unwrap();
	assert_eq!( rejected, bottom );

	let top = star.top().unwrap();
	let removed = star.propose( &top, &Draw{ slot: 2, u: 0.75 } ).unwrap();
	assert_eq!( star.itemset( &removed ), vec!( 1, 2 ));
	assert_eq!( removed.support().to_sorted_vec(), vec!( 0 ));
	let kept = star.propose( &top, &Draw{ slot: 2, u: 0.1 } ).unwrap();
	assert_eq!( kept, top );
    }

    #[test]
    fn test_bias_shifts_threshold() {
	let database = small_database();
	let bias = Bias::with_overrides( 1.0, [ (2, 3.0) ] ).unwrap();
	let star = StarMove::new( &database, &bias, 0.0 ).unwrap();
	// p = 3 / 4 for item 2
	let state = star.propose( &star.bottom(), &Draw{ slot: 1, u: 0.74 } ).unwrap();
	assert_eq!( star.itemset( &state ), vec!( 2 ));
	let state = star.propose( &star.bottom(), &Draw{ slot: 1, u: 0.76 } ).unwrap();
	assert!( state.is_empty() );
    }

    #[test]
    /// With tilt, adding an item that loses positive support gets less likely
    fn test_tilt_penalizes_lost_support() {
	let database = small_database();
	let star = StarMove::new( &database, &Bias::uniform( 1.0 ).unwrap(), 1.0 ).unwrap();
	// from {} adding 3 loses positive transactions 0 and 3: r = e^-2
	let expected = 1.0 / ( 1.0 + f64::exp( 2.0 ));
	let state = star.propose( &star.bottom(), &Draw{ slot: 2, u: expected - 1e-9 } ).unwrap();
	assert_eq!( star.itemset( &state ), vec!( 3 ));
	let state = star.propose( &star.bottom(), &Draw{ slot: 2, u: expected + 1e-9 } ).unwrap();
	assert!( state.is_empty() );
	// from {1, 2} only transaction 0 remains, adding 3 loses it: r = e^-1
	let from = star.state_of( &[ 1, 2 ] ).unwrap();
	let expected = 1.0 / ( 1.0 + f64::exp( 1.0 ));
	let state = star.propose( &from, &Draw{ slot: 2, u: expected - 1e-9 } ).unwrap();
	assert_eq!( star.itemset( &state ), vec!( 1, 2, 3 ));
	assert!( !state.is_supported() );
    }

    #[test]
    fn test_invalid_input() {
	let database = small_database();
	let bias = Bias::uniform( 1.0 ).unwrap();
	assert!( matches!( StarMove::new( &database, &bias, -0.5 ), Err( Error::InvalidTilt( _ ))));
	assert!( matches!( StarMove::new( &database, &bias, f64::NAN ), Err( Error::InvalidTilt( _ ))));
	let star = StarMove::new( &database, &bias, 0.0 ).unwrap();
	assert!( star.propose( &star.bottom(), &Draw{ slot: 3, u: 0.0 } ).is_err() );
	assert!( matches!( star.state_of( &[ 0 ] ), Err( Error::UnknownItem( 0 ))));
    }

    #[test]
    fn test_log_weight() {
	let database = small_database();
	let bias = Bias::with_overrides( 2.0, [ (3, 0.25) ] ).unwrap();
	let star = StarMove::new( &database, &bias, 0.5 ).unwrap();
	let state = star.state_of( &[ 1, 3 ] ).unwrap();
	// bias 2 * 0.5, support {2} is negative
	assert!(( star.log_weight( &state ).unwrap() - 0.0 ).abs() < 1e-12 );
	assert!(( star.log_bias( &state ).unwrap() - 0.0 ).abs() < 1e-12 );
	let state = star.state_of( &[ 2 ] ).unwrap();
	// support {0, 1, 4}, positive 0 and 1
	assert!(( star.log_weight( &state ).unwrap() - ( 2.0f64.ln() + 0.5 * 2.0 )).abs() < 1e-12 );
    }

    #[test]
    /// Sparse item ids map onto dense slots
    fn test_sparse_items() {
	let mut builder = DatabaseBuilder::new();
	builder.add( &[ 5, 4_000_000_000 ], Label::Positive );
	builder.add( &[ 4_000_000_000 ], Label::Positive );
	let database = builder.build().unwrap();
	let star = StarMove::new( &database, &Bias::uniform( 1.0 ).unwrap(), 0.0 ).unwrap();
	assert_eq!( star.slot_count(), 2 );
	assert_eq!( star.top().unwrap().slots().universe(), 2 );
	let state = star.state_of( &[ 4_000_000_000 ] ).unwrap();
	assert_eq!( state.support().to_sorted_vec(), vec!( 0, 1 ));
	let state = star.propose( &state, &Draw{ slot: 0, u: 0.1 } ).unwrap();
	assert_eq!( star.itemset( &state ), vec!( 5, 4_000_000_000 ));
    }

    mod monotone {
	use proptest::prelude::*;
	use super::super::*;
	use crate::data::{DatabaseBuilder, Label};

	/// random database, a nested pair of itemsets and a sequence of draws
	fn scenario() -> impl Strategy<Value = (Vec<(Itemvec, bool, f64)>, Vec<(usize, u8)>, Vec<(usize, f64)>)> {
	    let transaction = (proptest::collection::vec( 0usize .. 8, 1 .. 6 ), any::<bool>(), 0.1f64 .. 5.0);
	    (
		proptest::collection::vec( transaction, 1 .. 12 ),
		proptest::collection::vec( (0usize .. 8, 0u8 .. 3), 0 .. 8 ),
		proptest::collection::vec( (0usize .. 64, 0.0f64 .. 1.0), 1 .. 40 ),
	    )
	}

	fn build( transactions: &[(Itemvec, bool, f64)] ) -> TransactionDatabase {
	    let mut builder = DatabaseBuilder::new();
	    for (items, positive, weight) in transactions {
		let label = if *positive { Label::Positive } else { Label::Negative };
		let tid = builder.add( items, label );
		builder.set_weight( tid, *weight );
	    }
	    builder.build().unwrap()
	}

	proptest! {
	    #[test]
	    fn nested_states_stay_nested(
		(transactions, membership, draws) in scenario(),
		tilt in prop_oneof![ Just( 0.0 ), 0.0f64 .. 3.0 ],
		global in 0.2f64 .. 4.0,
		override_weight in 0.1f64 .. 10.0,
	    ) {
		let database = build( &transactions );
		let items = database.items().to_vec();
		let bias = Bias::with_overrides( global, [ (items[ 0 ], override_weight) ] ).unwrap();
		let star = StarMove::new( &database, &bias, tilt ).unwrap();

		// membership 0: in neither, 1: only in the larger state, 2: in both
		let mut lower_items = Itemvec::new();
		let mut upper_items = Itemvec::new();
		for (item, level) in &membership {
		    if !items.contains( item ) {
			continue;
		    }
		    if *level >= 1 && !upper_items.contains( item ) {
			upper_items.push( *item );
		    }
		    if *level == 2 && !lower_items.contains( item ) {
			lower_items.push( *item );
			if !upper_items.contains( item ) {
			    upper_items.push( *item );
			}
		    }
		}
		let mut lower = star.state_of( &lower_items ).unwrap();
		let mut upper = star.state_of( &upper_items ).unwrap();
		let mut top = star.top().unwrap();
		let mut bottom = star.bottom();

		for (slot, u) in draws {
		    let draw = Draw{ slot: slot % star.slot_count(), u };
		    star.apply( &mut lower, &draw ).unwrap();
		    star.apply( &mut upper, &draw ).unwrap();
		    star.apply( &mut top, &draw ).unwrap();
		    star.apply( &mut bottom, &draw ).unwrap();
		    prop_assert!( lower.is_subset( &upper ).unwrap() );
		    prop_assert!( bottom.is_subset( &lower ).unwrap() );
		    prop_assert!( upper.is_subset( &top ).unwrap() );
		    prop_assert_eq!( upper.support(), &database.support_of( &star.itemset( &upper )).unwrap() );
		}
	    }
	}
    }
}
