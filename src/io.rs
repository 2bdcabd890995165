use std::path::Path;
use std::fs::File;
use std::io::{BufReader, BufRead, BufWriter, Write};

use rustc_hash::FxHashMap;

use crate::{DatabaseBuilder, Item, Itemvec, Label, Sample, Tid};
use crate::error::{Error, Result};

/// Reads transactions in FIMI format, one transaction per line.
///
/// The tid of a transaction is its 0-based line number, and a blank line is an
/// empty transaction. With `labeled` the first token of each line is a class
/// label: the first label seen marks the positive transactions, every other
/// label the negative ones. A labeled line needs its label.
pub fn load_transactions<R: BufRead>( reader: R, labeled: bool ) -> Result<DatabaseBuilder> {
    let mut builder = DatabaseBuilder::new();
    let mut positive_label: Option<String> = None;
    for (index, line) in reader.lines().enumerate() {
	let line = line?;
	let line_number = index + 1;
	let trimmed = line.trim();

	let (label, body) = if labeled {
	    if trimmed.is_empty() {
		return Err( Error::Malformed{ line: line_number, content: line.clone(), reason: "missing label".to_string() } );
	    }
	    let mut split = trimmed.splitn( 2, char::is_whitespace );
	    let token = split.next().unwrap_or( "" );
	    let body = split.next().unwrap_or( "" );
	    let positive = positive_label.get_or_insert_with( || token.to_string() );
	    let label = if positive.as_str() == token { Label::Positive } else { Label::Negative };
	    (label, body)
	} else {
	    (Label::Positive, trimmed)
	};

	let items = parse_fimi_to_vec( body, line_number )?;
	builder.add( &items, label );
    }
    tracing::debug!( "loaded {} transactions, labeled {labeled}", builder.len() );
    Ok( builder )
}

pub fn read_transactions( path: &str, labeled: bool ) -> Result<DatabaseBuilder> {
    let file = File::open( Path::new( path ))?;
    load_transactions( BufReader::new( file ), labeled )
}

/// Parses `tid=weight` lines. Blank lines and lines starting with `#` are skipped.
pub fn parse_weights<R: BufRead>( reader: R ) -> Result<Vec<(Tid, f64)>> {
    let mut weights = Vec::new();
    for (index, line) in reader.lines().enumerate() {
	let line = line?;
	let trimmed = line.trim();
	if trimmed.is_empty() || trimmed.starts_with( '#' ) {
	    continue;
	}
	let malformed = |reason: &str| Error::Malformed{
	    line: index + 1,
	    content: line.clone(),
	    reason: reason.to_string(),
	};
	let (tid, weight) = trimmed.split_once( '=' ).ok_or_else( || malformed( "expected tid=weight" ))?;
	let tid = tid.trim().parse::<Tid>().map_err( |e| malformed( &e.to_string() ))?;
	let weight = weight.trim().parse::<f64>().map_err( |e| malformed( &e.to_string() ))?;
	weights.push( (tid, weight) );
    }
    Ok( weights )
}

pub fn read_weights( path: &str ) -> Result<Vec<(Tid, f64)>> {
    let file = File::open( Path::new( path ))?;
    parse_weights( BufReader::new( file ))
}

/// Parses whitespace separated item ids
pub fn parse_fimi_to_vec( line: &str, line_number: usize ) -> Result<Itemvec> {
    let mut items = Itemvec::new();
    for chunk in line.split_whitespace() {
	match chunk.parse::<Item>() {
	    Ok( item ) => items.push( item ),
	    Err( e ) => return Err( Error::Malformed{
		line: line_number,
		content: line.to_string(),
		reason: format!( "item {chunk:?}: {e}" ),
	    }),
	}
    }
    Ok( items )
}

/// Parses `item=weight` pairs, as given for per-item bias overrides
pub fn parse_item_weights <'a, I> ( pairs: I ) -> Result<FxHashMap<Item, f64>> where I: IntoIterator<Item = &'a str> {
    let mut weights = FxHashMap::default();
    for (index, pair) in pairs.into_iter().enumerate() {
	let malformed = |reason: String| Error::Malformed{ line: index + 1, content: pair.to_string(), reason };
	let (item, weight) = pair.split_once( '=' ).ok_or_else( || malformed( "expected item=weight".to_string() ))?;
	let item = item.trim().parse::<Item>().map_err( |e| malformed( e.to_string() ))?;
	let weight = weight.trim().parse::<f64>().map_err( |e| malformed( e.to_string() ))?;
	weights.insert( item, weight );
    }
    Ok( weights )
}

/// Creates a fimi string from an iterator over items
pub fn produce_fimi<I: Iterator<Item = Item>>( items: I, left_delimiter: &str, separator: &str, right_delimiter: &str ) -> String {
    let mut fimi = String::from( left_delimiter );
    for (position, item) in items.enumerate() {
	if position > 0 {
	    fimi.push_str( separator );
	}
	fimi.push_str( &item.to_string() );
    }
    fimi.push_str( right_delimiter );
    fimi
}

/// Writes one FIMI line per sample, its items or its supporting transactions
pub fn write_samples_fimi<W: Write>( samples: &[Sample], supports: bool, writer: &mut W ) -> Result<()> {
    for sample in samples {
	let line = if supports {
	    produce_fimi( sample.support.iter(), "", " ", "" )
	} else {
	    produce_fimi( sample.items.iter().copied(), "", " ", "" )
	};
	writeln!( writer, "{line}" )?;
    }
    Ok( () )
}

/// Writes the samples as a json array to a file
pub fn write_samples_json( samples: &[Sample], path: &str ) -> Result<()> {
    let file = File::create( Path::new( path ))?;
    let mut writer = BufWriter::new( file );
    serde_json::to_writer( &mut writer, samples )?;
    writer.flush()?;
    Ok( () )
}
