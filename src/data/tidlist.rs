use std::fmt;

use bit_vec::BitVec;

use crate::error::{Error, Result};

/// Fixed-universe bit vector over ids `0 .. universe`.
///
/// Used for sets of transaction ids as well as for itemsets. The algebra
/// (`intersect`, `union`, `difference`) returns fresh vectors. The only way to
/// change one vector through another is the in-place family `retain_all`,
/// `add_all` and `remove_all`, which takes `&mut self` so a vector can never be
/// shared while it is being modified.
#[derive( Debug, Clone, PartialEq, Eq, Hash )]
pub struct TidList {
    bits: BitVec,
}

impl TidList {

    /// The set without any ids.
    pub fn empty( universe: usize ) -> TidList {
	TidList{ bits: BitVec::from_elem( universe, false ) }
    }

    /// The set with every id of the universe.
    pub fn full( universe: usize ) -> TidList {
	TidList{ bits: BitVec::from_elem( universe, true ) }
    }

    /// Collects the given ids into a set, failing on the first id outside of the universe.
    pub fn from_indices<I>( universe: usize, indices: I ) -> Result<TidList> where I: IntoIterator<Item = usize> {
	let mut list = TidList::empty( universe );
	for index in indices {
	    list.insert( index )?;
	}
	Ok( list )
    }

    pub fn universe( &self ) -> usize {
	self.bits.len()
    }

    /// Adds the id. Returns whether it was absent before.
    pub fn insert( &mut self, index: usize ) -> Result<bool> {
	self.check_index( index )?;
	let absent = !self.bits[ index ];
	self.bits.set( index, true );
	Ok( absent )
    }

    /// Removes the id. Returns whether it was present before.
    pub fn remove( &mut self, index: usize ) -> Result<bool> {
	self.check_index( index )?;
	let present = self.bits[ index ];
	self.bits.set( index, false );
	Ok( present )
    }

    /// Ids outside of the universe are never contained.
    pub fn contains( &self, index: usize ) -> bool {
	self.bits.get( index ).unwrap_or( false )
    }

    pub fn cardinality( &self ) -> usize {
	// bit-vec keeps the bits past the end of the last block cleared
	self.bits.blocks().map( |block| block.count_ones() as usize ).sum()
    }

    pub fn is_empty( &self ) -> bool {
	self.bits.none()
    }

    pub fn is_subset( &self, other: &TidList ) -> Result<bool> {
	self.check_universe( other )?;
	let subset = self.bits.blocks()
	    .zip( other.bits.blocks() )
	    .all( |(mine, theirs)| mine & !theirs == 0 );
	Ok( subset )
    }

    /// Iterates the contained ids in increasing order.
    pub fn iter( &self ) -> impl Iterator<Item = usize> + '_ {
	self.bits.iter()
	    .enumerate()
	    .filter_map( |(index, bit)| if bit { Some( index ) } else { None } )
    }

    pub fn to_sorted_vec( &self ) -> Vec<usize> {
	self.iter().collect()
    }

    pub fn intersect( left: &TidList, right: &TidList ) -> Result<TidList> {
	let mut result = left.clone();
	result.retain_all( right )?;
	Ok( result )
    }

    pub fn union( left: &TidList, right: &TidList ) -> Result<TidList> {
	let mut result = left.clone();
	result.add_all( right )?;
	Ok( result )
    }

    /// Ids of `left` that are not in `right`.
    pub fn difference( left: &TidList, right: &TidList ) -> Result<TidList> {
	let mut result = left.clone();
	result.remove_all( right )?;
	Ok( result )
    }

    /// In place: keeps only ids that are also in `other`.
    pub fn retain_all( &mut self, other: &TidList ) -> Result<()> {
	self.check_universe( other )?;
	self.bits.and( &other.bits );
	Ok( () )
    }

    /// In place: adds every id of `other`.
    pub fn add_all( &mut self, other: &TidList ) -> Result<()> {
	self.check_universe( other )?;
	self.bits.or( &other.bits );
	Ok( () )
    }

    /// In place: drops every id of `other`.
    pub fn remove_all( &mut self, other: &TidList ) -> Result<()> {
	self.check_universe( other )?;
	self.bits.difference( &other.bits );
	Ok( () )
    }

    fn check_index( &self, index: usize ) -> Result<()> {
	if index < self.bits.len() {
	    Ok( () )
	} else {
	    Err( Error::IndexOutOfRange{ index, size: self.bits.len() } )
	}
    }

    fn check_universe( &self, other: &TidList ) -> Result<()> {
	if self.bits.len() == other.bits.len() {
	    Ok( () )
	} else {
	    Err( Error::DimensionMismatch{ left: self.bits.len(), right: other.bits.len() } )
	}
    }
}

/// Formats the ids as a FIMI line.
impl fmt::Display for TidList {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
	let mut first = true;
	for index in self.iter() {
	    if !first {
		write!( f, " " )?;
	    }
	    write!( f, "{index}" )?;
	    first = false;
	}
	Ok( () )
    }
}

impl serde::Serialize for TidList {
    fn serialize<S>( &self, serializer: S ) -> std::result::Result<S::Ok, S::Error> where S: serde::Serializer {
	serializer.collect_seq( self.iter() )
    }
}
