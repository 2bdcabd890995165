use rustc_hash::FxHashMap;

use crate::data::Item;
use crate::error::{Error, Result};

/// Multiplicative item weights that tilt sampling away from uniform.
///
/// `bias_of(item) = global_weight * overrides[item]`, where items without an
/// override count with 1.0. Immutable once built, so it can be read from any
/// number of chains at once.
#[derive( Debug, Clone, PartialEq )]
pub struct Bias {
    global_weight: f64,
    overrides: FxHashMap<Item, f64>,
}

impl Bias {

    /// Same weight for every item
    pub fn uniform( global_weight: f64 ) -> Result<Bias> {
	Bias::with_overrides( global_weight, FxHashMap::default() )
    }

    pub fn with_overrides <M> ( global_weight: f64, overrides: M ) -> Result<Bias> where M: IntoIterator<Item = (Item, f64)> {
	check_weight( None, global_weight )?;
	let overrides: FxHashMap<Item, f64> = overrides.into_iter().collect();
	for (item, weight) in &overrides {
	    check_weight( Some( *item ), *weight )?;
	    check_weight( Some( *item ), global_weight * weight )?;
	}
	Ok( Bias{ global_weight, overrides } )
    }

    pub fn global_weight( &self ) -> f64 {
	self.global_weight
    }

    pub fn overrides( &self ) -> &FxHashMap<Item, f64> {
	&self.overrides
    }

    pub fn is_uniform( &self ) -> bool {
	self.overrides.is_empty()
    }

    pub fn bias_of( &self, item: Item ) -> f64 {
	self.global_weight * self.overrides.get( &item ).copied().unwrap_or( 1.0 )
    }

    pub fn log_bias_of( &self, item: Item ) -> f64 {
	self.bias_of( item ).ln()
    }

    /// Multiplicative bias of an itemset, 1.0 for the empty set
    pub fn product <'a, I> ( &self, itemset: I ) -> f64 where I: IntoIterator<Item = &'a Item> {
	itemset.into_iter().map( |item| self.bias_of( *item )).product()
    }
}

fn check_weight( item: Option<Item>, weight: f64 ) -> Result<()> {
    if weight.is_finite() && weight > 0.0 {
	Ok( () )
    } else {
	Err( Error::InvalidBias{ item, weight } )
    }
}
