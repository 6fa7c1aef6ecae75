//! Entry points for running a regridding pass without an external launcher:
//! a serial pass on one rank, and a pass over several ranks simulated by
//! threads of a rayon pool talking through in-process channels.

use std::sync::Mutex;

use crate::config::RegridConfig;
use crate::controller::Controller;
use crate::error::Error;
use crate::flags::Flag;
use crate::message::local::LocalTransport;
use crate::region::Region;




/**
 * Compute patches covering `flags` within `region` on a single rank.
 */
pub fn regrid_serial(region: Region, flags: Vec<Flag>, config: RegridConfig) -> Result<Vec<Region>, Error> {
    let mut controller = Controller::new(LocalTransport::single(), config)?;
    Ok(controller.regrid(region, flags, &[0])?.unwrap_or_default())
}




/**
 * Compute patches covering the union of `flags` within `region`, with
 * `flags.len()` ranks each holding one share. Every rank runs its own
 * controller on a dedicated pool thread. The result is the one delivered to
 * rank 0.
 */
pub fn regrid_local(region: Region, flags: Vec<Vec<Flag>>, config: RegridConfig) -> Result<Vec<Region>, Error> {
    let size = flags.len();

    if size == 0 {
        return Err(Error::InvalidConfig("at least one rank is required".to_string()));
    }

    // Reject bad input before any rank starts.
    config.validate()?;

    for &flag in flags.iter().flatten() {
        if !region.contains(flag) {
            return Err(Error::FlagOutsideRegion { flag, region });
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(size)
        .thread_name(|index| format!("rank-{}", index))
        .build()?;

    let ranks: Vec<usize> = (0..size).collect();
    let slots: Vec<_> = LocalTransport::group(size)
        .into_iter()
        .zip(flags)
        .map(|share| Mutex::new(Some(share)))
        .collect();

    let results = pool.broadcast(|context| {
        let share = slots[context.index()].lock().map(|mut slot| slot.take()).unwrap_or(None);

        match share {
            Some((transport, flags)) => Controller::new(transport, config)?.regrid(region, flags, &ranks),
            None => panic!("rank {} started twice", context.index()),
        }
    });

    let mut home = None;
    let mut aborted = None;

    // Report the rank that failed first-hand, not the peers it aborted.
    for result in results {
        match result {
            Ok(Some(patches)) => home = Some(patches),
            Ok(None) => {}
            Err(e @ Error::Aborted { .. }) => aborted = aborted.or(Some(e)),
            Err(e) => return Err(e),
        }
    }
    match aborted {
        Some(e) => Err(e),
        None => Ok(home.unwrap_or_default()),
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{regrid_local, regrid_serial};
    use crate::config::RegridConfig;
    use crate::region::region;
    use crate::Error;

    #[test]
    fn two_ranks_agree_with_one() {
        let domain = region([0, 0, 0], [12, 12, 1]);
        let flags: Vec<_> = (0..12).map(|i| [i, i, 0]).collect();
        let config = RegridConfig::with_tolerances(0.5, 1.0);

        let serial = regrid_serial(domain, flags.clone(), config).unwrap();
        let (even, odd): (Vec<_>, Vec<_>) = flags.into_iter().partition(|f| f[0] % 2 == 0);
        let parallel = regrid_local(domain, vec![even, odd], config).unwrap();

        assert_eq!(serial, parallel);
    }

    #[test]
    fn stray_flags_are_rejected_before_any_rank_starts() {
        let domain = region([0, 0, 0], [4, 4, 1]);
        let result = regrid_local(domain, vec![vec![[0, 0, 0]], vec![[9, 0, 0]]], RegridConfig::default());

        assert!(matches!(result, Err(Error::FlagOutsideRegion { .. })));
    }
}
