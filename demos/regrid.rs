use std::net::TcpListener;
use std::thread;

use clap::Parser;
use log::{info, LevelFilter};
use patchwork::cluster::regrid_local;
use patchwork::message::tcp::TcpTransport;
use patchwork::{region, Controller, Error, Flag, Region, RegridConfig};
use serde::Serialize;
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[clap(version = "0.1", about = "Cluster the cells of a spherical shell into refinement patches")]
struct Opts {
    #[clap(short = 'r', long, default_value = "4")]
    ranks: usize,

    #[clap(short = 'n', long, default_value = "64")]
    cells: i64,

    #[clap(long, default_value = "0.35")]
    radius: f64,

    #[clap(long, default_value = "0.05")]
    thickness: f64,

    #[clap(long, default_value = "0.8")]
    tol_a: f64,

    #[clap(long, default_value = "1.0")]
    tol_b: f64,

    #[clap(long, help = "Exchange messages over localhost TCP instead of in-process channels")]
    tcp: bool,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: LevelFilter,

    #[clap(short = 'o', long, help = "Write the patches to this CBOR file")]
    output: Option<String>,
}




#[derive(Serialize)]
struct Output {
    domain: Region,
    num_flags: usize,
    patches: Vec<Region>,
}




/**
 * Flag every cell whose center lies within `thickness` of a sphere of the
 * given radius, in units where the domain is the unit cube.
 */
fn shell(cells: i64, radius: f64, thickness: f64) -> Vec<Flag> {
    let dx = 1.0 / cells as f64;
    let mut flags = Vec::new();

    for i in 0..cells {
        for j in 0..cells {
            for k in 0..cells {
                let x = (i as f64 + 0.5) * dx - 0.5;
                let y = (j as f64 + 0.5) * dx - 0.5;
                let z = (k as f64 + 0.5) * dx - 0.5;
                let r = (x * x + y * y + z * z).sqrt();

                if (r - radius).abs() < thickness {
                    flags.push([i, j, k]);
                }
            }
        }
    }
    flags
}




fn deal(flags: &[Flag], ranks: usize) -> Vec<Vec<Flag>> {
    let mut shares = vec![Vec::new(); ranks];

    for (n, &flag) in flags.iter().enumerate() {
        shares[n % ranks].push(flag);
    }
    shares
}




fn regrid_tcp(domain: Region, shares: Vec<Vec<Flag>>, config: RegridConfig) -> Result<Vec<Region>, Error> {
    let listeners = (0..shares.len())
        .map(|_| TcpListener::bind("127.0.0.1:0"))
        .collect::<Result<Vec<_>, _>>()?;
    let peers = listeners
        .iter()
        .map(TcpListener::local_addr)
        .collect::<Result<Vec<_>, _>>()?;
    let ranks: Vec<usize> = (0..shares.len()).collect();

    let handles: Vec<_> = listeners
        .into_iter()
        .zip(shares)
        .enumerate()
        .map(|(rank, (listener, flags))| {
            let peers = peers.clone();
            let ranks = ranks.clone();

            thread::spawn(move || {
                let transport = TcpTransport::from_listener(rank, listener, peers);
                Controller::new(transport, config)?.regrid(domain, flags, &ranks)
            })
        })
        .collect();

    let mut patches = Vec::new();

    for handle in handles {
        if let Some(home) = handle.join().expect("rank thread panicked")? {
            patches = home;
        }
    }
    Ok(patches)
}




// ============================================================================
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();

    SimpleLogger::new().with_level(opts.log_level).init()?;
    info!("{:?}", opts);

    let domain = region([0, 0, 0], [opts.cells, opts.cells, opts.cells]);
    let flags = shell(opts.cells, opts.radius, opts.thickness);
    let config = RegridConfig::with_tolerances(opts.tol_a, opts.tol_b);
    let shares = deal(&flags, opts.ranks);
    let start = std::time::Instant::now();

    let patches = if opts.tcp {
        regrid_tcp(domain, shares, config)?
    } else {
        regrid_local(domain, shares, config)?
    };

    let covered: u64 = patches.iter().map(Region::volume).sum();

    println!("flags ................. {}", flags.len());
    println!("patches ............... {}", patches.len());
    println!("patch cells ........... {}", covered);
    println!("efficiency ............ {:.3}", flags.len() as f64 / covered.max(1) as f64);
    println!("time .................. {:.3}s", start.elapsed().as_secs_f64());

    if let Some(output) = opts.output {
        let file = std::fs::File::create(&output)?;
        let mut buffer = std::io::BufWriter::new(file);
        let num_flags = flags.len();
        ciborium::ser::into_writer(&Output { domain, num_flags, patches }, &mut buffer)?;
        info!("wrote {}", output);
    }
    Ok(())
}
