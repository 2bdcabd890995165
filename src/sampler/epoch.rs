use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::*;
use crate::error::{Error, Result};

use super::CancellationToken;

/// Bounds of a single coupling run.
#[derive( Debug, Clone )]
pub struct EpochLimits {
    pub max_attempts: usize,
    pub max_window: usize,
    /// run the two extremal chains on separate rayon workers
    pub parallel_chains: bool,
}

/// Common state of the extremal chains after they met at time 0.
#[derive( Debug, Clone, PartialEq )]
pub struct Coalesced<S> {
    pub state: S,
    /// backward window that was simulated last
    pub window: usize,
    /// number of windows simulated
    pub attempts: usize,
}

/// One coupling-from-the-past run.
///
/// Owns the generator and the replay buffer. `replay[ k ]` is the draw used at
/// time `-(k + 1)`, so extending the window into the past appends to the
/// buffer and never touches draws that were already used.
pub struct Epoch<'a, P, S> where P: Proposal, S: BlockSizeSchedule + ?Sized {
    proposal: &'a P,
    schedule: &'a S,
    rng: StdRng,
    replay: Vec<Draw>,
    window: usize,
}

impl <'a, P, S> Epoch<'a, P, S> where P: Proposal, S: BlockSizeSchedule + ?Sized {

    pub fn new( proposal: &'a P, schedule: &'a S, seed: u64 ) -> Epoch<'a, P, S> {
	Epoch{
	    proposal,
	    schedule,
	    rng: StdRng::seed_from_u64( seed ),
	    replay: Vec::new(),
	    window: 0,
	}
    }

    /// Extends the window until top and bottom chain coalesce or a limit is hit.
    pub fn run( mut self, limits: &EpochLimits, cancel: Option<&CancellationToken> ) -> Result<Coalesced<P::State>> {
	if limits.max_attempts == 0 {
	    return Err( Error::NotCoalesced{ attempts: 0, window: 0 } );
	}
	if self.proposal.slot_count() == 0 {
	    // a single state, nothing to couple
	    return Ok( Coalesced{ state: self.proposal.bottom(), window: 0, attempts: 1 } );
	}

	let mut attempt = 0;
	let mut window = self.schedule.next_increase( 0 );
	loop {
	    if cancel.map_or( false, |token| token.is_cancelled() ) {
		return Err( Error::Cancelled );
	    }
	    if window > limits.max_window {
		return Err( Error::NotCoalesced{ attempts: attempt, window: self.window } );
	    }

	    self.extend( window );
	    let (top, bottom) = self.simulate( limits.parallel_chains )?;
	    trace!( "attempt {attempt}: window {window}, top {top:?}, bottom {bottom:?}" );

	    attempt += 1;
	    if top == bottom {
		debug!( "coalesced after {attempt} attempts in window {window}" );
		return Ok( Coalesced{ state: top, window, attempts: attempt } );
	    }
	    if attempt >= limits.max_attempts {
		return Err( Error::NotCoalesced{ attempts: attempt, window } );
	    }
	    window = window.saturating_add( self.schedule.next_increase( attempt ));
	}
    }

    pub fn window( &self ) -> usize {
	self.window
    }

    /// Draws for the times `[-window, -self.window)`; later times keep their draws.
    fn extend( &mut self, window: usize ) {
	let slot_count = self.proposal.slot_count();
	self.replay.reserve( window.saturating_sub( self.window ));
	while self.replay.len() < window {
	    self.replay.push( Draw::random( &mut self.rng, slot_count ));
	}
	self.window = window;
    }

    /// Runs top and bottom chain from `-window` to 0 on the same draws.
    fn simulate( &self, parallel: bool ) -> Result<(P::State, P::State)> {
	let replay = &self.replay[ .. self.window ];
	let top = || run_chain( self.proposal, self.proposal.top()?, replay );
	let bottom = || run_chain( self.proposal, self.proposal.bottom(), replay );
	let (top, bottom) = if parallel {
	    rayon::join( top, bottom )
	} else {
	    (top(), bottom())
	};
	Ok( (top?, bottom?) )
    }
}

/// Applies the replayed draws in chronological order, oldest first.
fn run_chain<P: Proposal>( proposal: &P, mut state: P::State, replay: &[Draw] ) -> Result<P::State> {
    for draw in replay.iter().rev() {
	proposal.apply( &mut state, draw )?;
    }
    Ok( state )
}
