use std::net::TcpListener;
use std::thread;

use patchwork::cluster::regrid_serial;
use patchwork::message::tcp::TcpTransport;
use patchwork::{region, Controller, Flag, RegridConfig};




#[test]
fn three_ranks_over_localhost_agree_with_serial() {
    let domain = region([0, 0, 0], [24, 24, 4]);
    let flags: Vec<Flag> = (0..24)
        .flat_map(|i| vec![[i, i, 1], [i, 23 - i, 2], [3, i, 0]])
        .collect();
    let config = RegridConfig::with_tolerances(0.7, 1.0);
    let serial = regrid_serial(domain, flags.clone(), config).unwrap();

    let listeners: Vec<_> = (0..3).map(|_| TcpListener::bind("127.0.0.1:0").unwrap()).collect();
    let peers: Vec<_> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();

    let handles: Vec<_> = listeners
        .into_iter()
        .enumerate()
        .map(|(rank, listener)| {
            let peers = peers.clone();
            let share: Vec<Flag> = flags.iter().skip(rank).step_by(3).cloned().collect();

            thread::spawn(move || {
                let transport = TcpTransport::from_listener(rank, listener, peers);
                let mut controller = Controller::new(transport, config).unwrap();
                controller.regrid(domain, share, &[0, 1, 2]).unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results[0], Some(serial));
    assert!(results[1].is_none() && results[2].is_none());
}
