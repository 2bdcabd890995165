use serde::{Deserialize, Serialize};

/// Growth of the backward window of a coupling run.
///
/// `next_increase( t )` is added to the window before attempt `t`, the first
/// window being `next_increase( 0 )`. Implementations must return at least 1
/// for every attempt, which makes the cumulative window strictly increasing
/// and unbounded.
pub trait BlockSizeSchedule: Sync {
    fn next_increase( &self, attempt: usize ) -> usize;

    /// Window length after the given attempt
    fn window( &self, attempt: usize ) -> usize {
	(0 ..= attempt).fold( 0usize, |window, t| window.saturating_add( self.next_increase( t )))
    }
}

#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( tag = "policy", rename_all = "snake_case" )]
pub enum BlockSizePolicy {
    /// Window doubles on every failed attempt: initial, 2 initial, 4 initial, ...
    Doubling { initial: usize },
    /// Window grows by a constant step
    Additive { initial: usize, step: usize },
    /// Window is multiplied by `factor` on every failed attempt
    Geometric { initial: usize, factor: usize },
}

impl Default for BlockSizePolicy {
    fn default() -> Self {
	BlockSizePolicy::Doubling{ initial: 2 }
    }
}

impl BlockSizePolicy {

    /// Zero initial windows and factors below 2 are lifted to the smallest growing values.
    fn normalized( &self ) -> BlockSizePolicy {
	match *self {
	    BlockSizePolicy::Doubling{ initial } => BlockSizePolicy::Doubling{ initial: initial.max( 1 ) },
	    BlockSizePolicy::Additive{ initial, step } => BlockSizePolicy::Additive{ initial: initial.max( 1 ), step: step.max( 1 ) },
	    BlockSizePolicy::Geometric{ initial, factor } => BlockSizePolicy::Geometric{ initial: initial.max( 1 ), factor: factor.max( 2 ) },
	}
    }
}

impl BlockSizeSchedule for BlockSizePolicy {

    fn next_increase( &self, attempt: usize ) -> usize {
	let increase = match self.normalized() {
	    BlockSizePolicy::Doubling{ initial } => {
		if attempt == 0 {
		    initial
		} else {
		    // current window is initial * 2^(attempt - 1)
		    scale( initial, 2, attempt - 1 )
		}
	    },
	    BlockSizePolicy::Additive{ initial, step } => {
		if attempt == 0 { initial } else { step }
	    },
	    BlockSizePolicy::Geometric{ initial, factor } => {
		if attempt == 0 {
		    initial
		} else {
		    // window goes from initial * factor^(t-1) to initial * factor^t
		    scale( initial, factor, attempt - 1 ).saturating_mul( factor - 1 )
		}
	    },
	};
	increase.max( 1 )
    }
}

fn scale( base: usize, factor: usize, exponent: usize ) -> usize {
    let exponent = u32::try_from( exponent ).unwrap_or( u32::MAX );
    base.saturating_mul( factor.saturating_pow( exponent ))
}

#[cfg(test)]
mod test {

    use super::*;

    fn policies() -> Vec<BlockSizePolicy> {
	vec!(
	    BlockSizePolicy::default(),
	    BlockSizePolicy::Doubling{ initial: 0 },
	    BlockSizePolicy::Additive{ initial: 3, step: 5 },
	    BlockSizePolicy::Additive{ initial: 0, step: 0 },
	    BlockSizePolicy::Geometric{ initial: 1, factor: 3 },
	    BlockSizePolicy::Geometric{ initial: 4, factor: 0 },
	)
    }

    #[test]
    fn test_doubling_windows() {
	let schedule = BlockSizePolicy::Doubling{ initial: 2 };
	let windows: Vec<usize> = (0 .. 6).map( |t| schedule.window( t )).collect();
	assert_eq!( windows, vec!( 2, 4, 8, 16, 32, 64 ));
    }

    #[test]
    fn test_additive_and_geometric_windows() {
	let additive = BlockSizePolicy::Additive{ initial: 3, step: 5 };
	assert_eq!( (0 .. 4).map( |t| additive.window( t )).collect::<Vec<_>>(), vec!( 3, 8, 13, 18 ));
	let geometric = BlockSizePolicy::Geometric{ initial: 1, factor: 3 };
	assert_eq!( (0 .. 4).map( |t| geometric.window( t )).collect::<Vec<_>>(), vec!( 1, 3, 9, 27 ));
    }

    #[test]
    /// Cumulative window is strictly increasing and passes any cap
    fn test_windows_increase_without_bound() {
	let cap = 10_000;
	for policy in policies() {
	    let mut last = 0;
	    let mut passed_cap = false;
	    for t in 0 .. 20_000 {
		let window = last + policy.next_increase( t );
		if t < 8 {
		    assert_eq!( window, policy.window( t ));
		}
		assert!( window > last, "{policy:?} not increasing at {t}" );
		last = window;
		if window > cap {
		    passed_cap = true;
		    break;
		}
	    }
	    assert!( passed_cap, "{policy:?} stays below {cap}" );
	}
    }

    #[test]
    fn test_saturates() {
	let schedule = BlockSizePolicy::Doubling{ initial: 2 };
	assert_eq!( schedule.next_increase( 200 ), usize::MAX );
	assert_eq!( schedule.window( 200 ), usize::MAX );
    }

    #[test]
    fn test_deserialize() {
	let policy: BlockSizePolicy = serde_json::from_str( r#"{"policy":"additive","initial":4,"step":2}"# ).unwrap();
	assert_eq!( policy, BlockSizePolicy::Additive{ initial: 4, step: 2 } );
	let policy: BlockSizePolicy = serde_json::from_str( r#"{"policy":"doubling","initial":8}"# ).unwrap();
	assert_eq!( policy.window( 1 ), 16 );
    }
}
