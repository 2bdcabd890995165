use bit_set::BitSet;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

mod tidlist;

pub use tidlist::TidList;

pub type Item = usize;
pub type Tid = usize;
pub type Itemvec = Vec<Item>;

/// Read-only view of a labeled, weighted transaction database.
pub trait Database {

    /// Number of transactions, which is also the universe of every TidList handed out
    fn transaction_count( &self ) -> usize;

    /// Sorted items that occur in at least one transaction
    fn items( &self ) -> &[Item];

    /// Exact set of transactions containing the item. Unknown items have empty support.
    fn item_support( &self, item: Item ) -> TidList;

    /// Sorted items of a transaction
    fn transaction_items( &self, tid: Tid ) -> Result<Itemvec>;

    /// Weight of a transaction, 1.0 unless set explicitly
    fn transaction_weight( &self, tid: Tid ) -> Result<f64>;

    fn positive( &self ) -> &TidList;

    fn negative( &self ) -> &TidList;

    /// Transactions containing every item of the itemset.
    fn support_of <'a, I> ( &self, itemset: I ) -> Result<TidList> where I: IntoIterator<Item = &'a Item> {
	let mut support = TidList::full( self.transaction_count() );
	for item in itemset {
	    support.retain_all( &self.item_support( *item ))?;
	}
	Ok( support )
    }

    /// Sum of the weights of the given transactions
    fn weighted_size( &self, tids: &TidList ) -> Result<f64> {
	let mut size = 0.0;
	for tid in tids.iter() {
	    size += self.transaction_weight( tid )?;
	}
	Ok( size )
    }
}

#[derive( Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize )]
pub enum Label {
    Positive,
    Negative,
}

/// Elements of a transactional database. The id is the insertion position.
///
/// Items are stored by their dense code, the position of the item in the
/// database's sorted item list, so sparse item ids cost nothing.
#[derive( Debug, Clone )]
pub struct Transaction {
    tid: Tid,
    codes: BitSet,
    label: Label,
}

impl Transaction {
    pub fn tid( &self ) -> Tid { self.tid }
    pub fn label( &self ) -> Label { self.label }
    pub fn len( &self ) -> usize { self.codes.len() }
    pub fn is_empty( &self ) -> bool { self.codes.is_empty() }

    /// Dense item codes in increasing order
    pub fn codes<'a>( &'a self ) -> Box<dyn Iterator<Item = usize> + 'a> {
	Box::new( self.codes.iter() )
    }
}

/// Collects transactions and weights. Nothing is indexed before `build`.
#[derive( Debug, Default )]
pub struct DatabaseBuilder {
    transactions: Vec<(Itemvec, Label)>,
    weights: FxHashMap<Tid, f64>,
}

/// Immutable transaction database with an exact item index.
///
/// There is no way to add transactions once built, so the index can never go
/// stale. Share it by reference or `Arc` between any number of samplers.
#[derive( Debug )]
pub struct TransactionDatabase {
    transactions: Vec<Transaction>,
    weights: Vec<f64>,
    /// sorted items, the position is the item's code
    items: Vec<Item>,
    /// code -> transactions containing the item
    supports: Vec<TidList>,
    positive: TidList,
    negative: TidList,
}

impl DatabaseBuilder {

    pub fn new() -> DatabaseBuilder {
	DatabaseBuilder::default()
    }

    /// Appends a transaction and returns the id it was assigned.
    pub fn add <'a, I> ( &mut self, items: I, label: Label ) -> Tid where I: IntoIterator<Item = &'a Item> {
	let tid = self.transactions.len();
	let mut items: Itemvec = items.into_iter().copied().collect();
	items.sort_unstable();
	items.dedup();
	self.transactions.push( (items, label) );
	tid
    }

    /// Adds every transaction produced by the iterator as a positive transaction
    pub fn add_all <'a, Con, T> ( &mut self, transactions: Con ) where
	Con: IntoIterator<Item = T>,
	T: IntoIterator<Item = &'a Item>,
    {
	for transaction in transactions {
	    self.add( transaction, Label::Positive );
	}
    }

    pub fn set_weight( &mut self, tid: Tid, weight: f64 ) {
	self.weights.insert( tid, weight );
    }

    pub fn set_weights <I> ( &mut self, weights: I ) where I: IntoIterator<Item = (Tid, f64)> {
	self.weights.extend( weights );
    }

    pub fn len( &self ) -> usize {
	self.transactions.len()
    }

    pub fn is_empty( &self ) -> bool {
	self.transactions.is_empty()
    }

    /// Validates weights, remaps items to dense codes and builds the item index.
    pub fn build( self ) -> Result<TransactionDatabase> {
	let n = self.transactions.len();

	let mut weights = vec!( 1.0; n );
	for (tid, weight) in self.weights {
	    if tid >= n {
		return Err( Error::IndexOutOfRange{ index: tid, size: n } );
	    }
	    if !weight.is_finite() || weight <= 0.0 {
		return Err( Error::InvalidWeight{ tid, weight } );
	    }
	    weights[ tid ] = weight;
	}

	let mut items: Itemvec = self.transactions.iter()
	    .flat_map( |(items, _)| items.iter().copied() )
	    .collect();
	items.sort_unstable();
	items.dedup();

	let mut supports = vec!( TidList::empty( n ); items.len() );
	let mut positive = TidList::empty( n );
	let mut negative = TidList::empty( n );
	let mut transactions = Vec::with_capacity( n );
	for (tid, (raw, label)) in self.transactions.into_iter().enumerate() {
	    let mut codes = BitSet::with_capacity( items.len() );
	    for item in &raw {
		let code = items.binary_search( item ).map_err( |_| Error::UnknownItem( *item ))?;
		codes.insert( code );
		supports[ code ].insert( tid )?;
	    }
	    match label {
		Label::Positive => positive.insert( tid )?,
		Label::Negative => negative.insert( tid )?,
	    };
	    transactions.push( Transaction{ tid, codes, label } );
	}

	tracing::debug!( "indexed {} transactions over {} items ({} positive)", n, items.len(), positive.cardinality() );

	Ok( TransactionDatabase{
	    transactions,
	    weights,
	    items,
	    supports,
	    positive,
	    negative,
	})
    }
}

impl Database for TransactionDatabase {

    fn transaction_count( &self ) -> usize {
	self.transactions.len()
    }

    fn items( &self ) -> &[Item] {
	&self.items
    }

    fn item_support( &self, item: Item ) -> TidList {
	match self.code_of( item ) {
	    Some( code ) => self.supports[ code ].clone(),
	    None => TidList::empty( self.transactions.len() ),
	}
    }

    fn transaction_items( &self, tid: Tid ) -> Result<Itemvec> {
	let transaction = self.transaction( tid )?;
	Ok( transaction.codes().map( |code| self.items[ code ] ).collect() )
    }

    fn transaction_weight( &self, tid: Tid ) -> Result<f64> {
	self.weights.get( tid )
	    .copied()
	    .ok_or( Error::IndexOutOfRange{ index: tid, size: self.weights.len() } )
    }

    fn positive( &self ) -> &TidList {
	&self.positive
    }

    fn negative( &self ) -> &TidList {
	&self.negative
    }

    fn support_of <'a, I> ( &self, itemset: I ) -> Result<TidList> where I: IntoIterator<Item = &'a Item> {
	let mut support = TidList::full( self.transactions.len() );
	for item in itemset {
	    match self.code_of( *item ) {
		Some( code ) => support.retain_all( &self.supports[ code ] )?,
		None => return Ok( TidList::empty( self.transactions.len() )),
	    }
	}
	Ok( support )
    }
}

impl TransactionDatabase {

    pub fn transaction( &self, tid: Tid ) -> Result<&Transaction> {
	self.transactions.get( tid )
	    .ok_or( Error::IndexOutOfRange{ index: tid, size: self.transactions.len() } )
    }

    pub fn transactions( &self ) -> impl Iterator<Item = &Transaction> {
	self.transactions.iter()
    }

    /// Position of the item in `items()`
    pub fn code_of( &self, item: Item ) -> Option<usize> {
	self.items.binary_search( &item ).ok()
    }
}
